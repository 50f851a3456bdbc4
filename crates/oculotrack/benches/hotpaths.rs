use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{GrayImage, Luma};

use oculotrack::iris::IrisMeasurement;
use oculotrack::pupil::{find_pupil, PupilConfig};
use oculotrack::torsion::{compute_torsion, TorsionConfig};
use oculotrack::{Ellipse, Roi};

/// Synthetic eye: dark pupil, textured iris, bright sclera.
fn draw_eye(rotation_deg: f64) -> GrayImage {
    let (w, h) = (320u32, 240u32);
    let center = [160.0f64, 120.0f64];
    let (pupil_r, iris_r) = (24.0f64, 64.0f64);
    let rot = rotation_deg.to_radians();
    let mut img = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f64 - center[0];
            let dy = y as f64 - center[1];
            let d = (dx * dx + dy * dy).sqrt();
            let pix = if d <= pupil_r {
                20
            } else if d <= iris_r {
                let t = dy.atan2(dx) - rot;
                (130.0 + 22.0 * (3.0 * t).sin() + 18.0 * (7.0 * t + 1.3).sin()
                    + 12.0 * (13.0 * t + 2.1).sin()) as u8
            } else {
                200
            };
            img.put_pixel(x, y, Luma([pix]));
        }
    }
    img
}

fn bench_pupil_search(c: &mut Criterion) {
    let img = draw_eye(0.0);
    let cfg = PupilConfig::default();
    let roi = Roi::full(&img);
    c.bench_function("pupil_search_320x240", |b| {
        b.iter(|| black_box(find_pupil(black_box(&img), roi, &cfg, None)))
    });
}

fn bench_torsion(c: &mut Criterion) {
    let cfg = TorsionConfig::default();
    let pupil = Ellipse {
        cx: 160.0,
        cy: 120.0,
        a: 24.0,
        b: 24.0,
        angle: 0.0,
    };
    let iris = IrisMeasurement {
        radius_px: 64.0,
        quality: 1.0,
    };
    let reference = compute_torsion(&draw_eye(0.0), None, &pupil, &iris, None, &cfg)
        .new_reference
        .expect("reference");
    let img = draw_eye(4.0);
    c.bench_function("torsion_correlate_360deg", |b| {
        b.iter(|| {
            black_box(compute_torsion(
                black_box(&img),
                None,
                &pupil,
                &iris,
                Some(&reference),
                &cfg,
            ))
        })
    });
}

criterion_group!(benches, bench_pupil_search, bench_torsion);
criterion_main!(benches);
