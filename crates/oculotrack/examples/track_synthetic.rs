//! Run the per-eye pipeline over a few synthetic frames and print records.
//!
//! ```sh
//! cargo run --example track_synthetic
//! ```

use image::{GrayImage, Luma};
use oculotrack::{Eye, EyePipeline, PipelineConfig, PipelineState, RawFrame};

fn draw_eye(rotation_deg: f64) -> GrayImage {
    let (w, h) = (160u32, 120u32);
    let center = [80.0f64, 60.0f64];
    let (pupil_r, iris_r) = (12.0f64, 32.0f64);
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

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let pipeline = EyePipeline::new(Eye::Left, PipelineConfig::default())?;
    let mut state = PipelineState::default();

    // Frame 1 captures the torsion reference; later frames rotate the iris.
    for (i, rotation) in [0.0, 2.0, 4.0, -3.0].into_iter().enumerate() {
        let frame = RawFrame {
            image: draw_eye(rotation),
            timestamp_secs: i as f64 / 100.0,
            timestamp_raw: (i as u64) * 10_000,
            frame_number: i as u64 + 1,
            eye: Eye::Left,
        };
        let (record, next) = pipeline.process(&frame, state);
        state = next;
        println!(
            "frame {}: result {:?}, pupil {:?}, torsion {:+.2} deg (quality {:.2})",
            record.frame_number,
            record.result,
            record.pupil.map(|p| (p.cx, p.cy)),
            record.torsion_deg,
            record.quality,
        );
    }
    Ok(())
}
