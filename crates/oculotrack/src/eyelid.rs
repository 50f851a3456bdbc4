//! Eyelid contour detection and temporal filtering.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ellipse::Ellipse;
use crate::eye::EyePhysicalModel;

/// Eyelid detection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EyelidMethod {
    /// Eyelid tracking disabled; downstream masking treats the whole frame
    /// as unmasked.
    None,
    /// Column-wise vertical gradient scan.
    #[default]
    EdgeScan,
}

/// Four-point upper and lower eyelid polylines for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Eyelids {
    /// Upper lid, left to right.
    pub upper: [[f64; 2]; 4],
    /// Lower lid, left to right.
    pub lower: [[f64; 2]; 4],
}

/// Eyelid tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EyelidConfig {
    /// Detection method; `None` disables eyelid masking entirely.
    pub method: EyelidMethod,
    /// Minimum absolute vertical gradient (intensity levels per pixel) for a
    /// lid edge to count.
    pub min_gradient: f32,
    /// Minimum number of the four columns that must find an edge.
    pub min_columns: usize,
    /// Fraction the filtered estimate moves toward the raw detection per
    /// frame, in (0, 1]. Small values reject blink transients.
    pub blend: f64,
}

impl Default for EyelidConfig {
    fn default() -> Self {
        Self {
            method: EyelidMethod::EdgeScan,
            min_gradient: 4.0,
            min_columns: 3,
            blend: 0.25,
        }
    }
}

/// Column x-positions used for the scan, as fractions of the eye radius.
const COLUMN_OFFSETS: [f64; 4] = [-0.6, -0.2, 0.2, 0.6];

/// Detect upper and lower eyelid polylines.
///
/// At four columns spread across the eye-model width, scans vertically away
/// from the pupil for the strongest smoothed vertical gradient. Columns where
/// no edge clears `min_gradient` fall back to the scan end (lid out of view);
/// the detection is rejected entirely when fewer than `min_columns` columns
/// find a real edge.
pub fn detect_eyelids(
    img: &GrayImage,
    pupil: &Ellipse,
    eye: &EyePhysicalModel,
    config: &EyelidConfig,
) -> Option<Eyelids> {
    if config.method == EyelidMethod::None {
        return None;
    }
    let h = img.height() as f64;

    let pupil_top = pupil.cy - pupil.a - 2.0;
    let pupil_bottom = pupil.cy + pupil.a + 2.0;
    let scan_top = (eye.center[1] - eye.radius).max(0.0);
    let scan_bottom = (eye.center[1] + eye.radius).min(h - 1.0);

    let mut upper = [[0.0; 2]; 4];
    let mut lower = [[0.0; 2]; 4];
    let mut found_upper = 0usize;
    let mut found_lower = 0usize;

    for (i, off) in COLUMN_OFFSETS.iter().enumerate() {
        let x = eye.center[0] + off * eye.radius;

        match column_edge(img, x, pupil_top, scan_top, config.min_gradient) {
            Some(y) => {
                upper[i] = [x, y];
                found_upper += 1;
            }
            None => upper[i] = [x, scan_top],
        }
        match column_edge(img, x, pupil_bottom, scan_bottom, config.min_gradient) {
            Some(y) => {
                lower[i] = [x, y];
                found_lower += 1;
            }
            None => lower[i] = [x, scan_bottom],
        }
    }

    if found_upper < config.min_columns || found_lower < config.min_columns {
        debug!(found_upper, found_lower, "eyelid scan below column quorum");
        return None;
    }
    Some(Eyelids { upper, lower })
}

/// Blend the previous filtered estimate toward a raw detection.
///
/// Each point moves `blend` of the way to its raw counterpart, so a one-frame
/// blink transient only displaces the filtered lids by a bounded step.
pub fn filter_eyelids(previous: &Eyelids, raw: &Eyelids, blend: f64) -> Eyelids {
    let blend = blend.clamp(0.0, 1.0);
    let mix = |p: [f64; 2], r: [f64; 2]| {
        [
            p[0] + blend * (r[0] - p[0]),
            p[1] + blend * (r[1] - p[1]),
        ]
    };
    let mut out = *previous;
    for i in 0..4 {
        out.upper[i] = mix(previous.upper[i], raw.upper[i]);
        out.lower[i] = mix(previous.lower[i], raw.lower[i]);
    }
    out
}

/// Strongest vertical edge along one column between `from_y` and `to_y`
/// (scanning away from the pupil). Returns the edge y, or `None` when no
/// gradient clears `min_gradient`.
fn column_edge(img: &GrayImage, x: f64, from_y: f64, to_y: f64, min_gradient: f32) -> Option<f64> {
    let xi = x.round();
    if xi < 0.0 || xi >= img.width() as f64 {
        return None;
    }
    let xi = xi as u32;

    let (y0, y1) = if from_y <= to_y {
        (from_y.max(0.0) as u32, to_y.min(img.height() as f64 - 1.0) as u32)
    } else {
        (to_y.max(0.0) as u32, from_y.min(img.height() as f64 - 1.0) as u32)
    };
    if y1 <= y0 + 2 {
        return None;
    }

    let profile: Vec<f32> = (y0..=y1).map(|y| img.get_pixel(xi, y)[0] as f32).collect();
    let smooth: Vec<f32> = (0..profile.len())
        .map(|i| {
            if i == 0 || i + 1 == profile.len() {
                profile[i]
            } else {
                (profile[i - 1] + profile[i] + profile[i + 1]) / 3.0
            }
        })
        .collect();

    let mut best_idx = 0usize;
    let mut best_mag = 0.0f32;
    for i in 1..smooth.len() - 1 {
        let d = (smooth[i + 1] - smooth[i - 1]) * 0.5;
        if d.abs() > best_mag {
            best_mag = d.abs();
            best_idx = i;
        }
    }
    (best_mag >= min_gradient).then(|| (y0 + best_idx as u32) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Eye area bright, skin above y=20 and below y=80 darker.
    fn lidded_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(100, 100, Luma([160]));
        for y in 0..20u32 {
            for x in 0..100u32 {
                img.put_pixel(x, y, Luma([60]));
            }
        }
        for y in 80..100u32 {
            for x in 0..100u32 {
                img.put_pixel(x, y, Luma([60]));
            }
        }
        img
    }

    fn scene() -> (Ellipse, EyePhysicalModel) {
        (
            Ellipse {
                cx: 50.0,
                cy: 50.0,
                a: 12.0,
                b: 12.0,
                angle: 0.0,
            },
            EyePhysicalModel {
                center: [50.0, 50.0],
                radius: 45.0,
            },
        )
    }

    #[test]
    fn detects_horizontal_lid_edges() {
        let img = lidded_image();
        let (pupil, eye) = scene();
        let lids = detect_eyelids(&img, &pupil, &eye, &EyelidConfig::default()).expect("lids");
        for p in lids.upper {
            assert!((p[1] - 20.0).abs() <= 3.0, "upper at {:?}", p);
        }
        for p in lids.lower {
            assert!((p[1] - 80.0).abs() <= 3.0, "lower at {:?}", p);
        }
    }

    #[test]
    fn method_none_detects_nothing() {
        let img = lidded_image();
        let (pupil, eye) = scene();
        let cfg = EyelidConfig {
            method: EyelidMethod::None,
            ..Default::default()
        };
        assert!(detect_eyelids(&img, &pupil, &eye, &cfg).is_none());
    }

    #[test]
    fn featureless_image_fails_quorum() {
        let img = GrayImage::from_pixel(100, 100, Luma([128]));
        let (pupil, eye) = scene();
        assert!(detect_eyelids(&img, &pupil, &eye, &EyelidConfig::default()).is_none());
    }

    #[test]
    fn filter_step_is_bounded() {
        let prev = Eyelids {
            upper: [[10.0, 20.0]; 4],
            lower: [[10.0, 80.0]; 4],
        };
        // A blink slams the raw detection 40 px downward.
        let raw = Eyelids {
            upper: [[10.0, 60.0]; 4],
            lower: [[10.0, 80.0]; 4],
        };
        let filtered = filter_eyelids(&prev, &raw, 0.25);
        for p in filtered.upper {
            assert!((p[1] - 30.0).abs() < 1e-9);
        }
        for p in filtered.lower {
            assert!((p[1] - 80.0).abs() < 1e-9);
        }
    }
}
