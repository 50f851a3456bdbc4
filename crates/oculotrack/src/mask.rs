//! Usable-pixel mask construction.
//!
//! Combines bright-reflection exclusion with an eyelid region built from the
//! filtered lid polylines: each lid's four points, pushed outward by a fixed
//! margin, plus the two eye-corner points implied by the physical model, are
//! least-squares fit to a parabola; the mask keeps the band between the two
//! parabolas and is filled column by column.

use image::{GrayImage, Luma};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::eye::EyePhysicalModel;
use crate::eyelid::Eyelids;

/// Mask builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskConfig {
    /// Pixels at or above this intensity are excluded as reflections.
    pub bright_threshold: u8,
    /// Extra pixels of lid excluded beyond the detected polyline.
    pub eyelid_margin_px: f64,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            bright_threshold: 230,
            eyelid_margin_px: 4.0,
        }
    }
}

/// Build the binary mask: 255 = usable, 0 = excluded.
///
/// With `eyelids` absent (tracking disabled or no detection yet) only the
/// bright-reflection exclusion applies, so a frame with no bright pixels
/// yields an all-ones mask.
pub fn build_mask(
    img: &GrayImage,
    eyelids: Option<&Eyelids>,
    eye: &EyePhysicalModel,
    config: &MaskConfig,
) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut mask = GrayImage::from_pixel(w, h, Luma([255]));

    for y in 0..h {
        for x in 0..w {
            if img.get_pixel(x, y)[0] >= config.bright_threshold {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
    }

    let Some(lids) = eyelids else {
        return mask;
    };

    let corners = [
        [eye.center[0] - eye.radius, eye.center[1]],
        [eye.center[0] + eye.radius, eye.center[1]],
    ];
    let margin = config.eyelid_margin_px;

    let upper_pts: Vec<[f64; 2]> = lids
        .upper
        .iter()
        .map(|p| [p[0], p[1] + margin])
        .chain(corners.iter().copied())
        .collect();
    let lower_pts: Vec<[f64; 2]> = lids
        .lower
        .iter()
        .map(|p| [p[0], p[1] - margin])
        .chain(corners.iter().copied())
        .collect();

    let upper = fit_parabola(&upper_pts);
    let lower = fit_parabola(&lower_pts);

    for x in 0..w {
        let fx = x as f64;
        let y_top = upper.map_or(0.0, |c| eval_parabola(c, fx));
        let y_bot = lower.map_or(h as f64, |c| eval_parabola(c, fx));
        for y in 0..h {
            let fy = y as f64;
            if fy < y_top || fy > y_bot {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
    }
    mask
}

/// Least-squares parabola y = c₀ + c₁x + c₂x² through the given points.
fn fit_parabola(points: &[[f64; 2]]) -> Option<[f64; 3]> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len();
    let mut a = DMatrix::<f64>::zeros(n, 3);
    let mut b = DVector::<f64>::zeros(n);
    for (i, p) in points.iter().enumerate() {
        a[(i, 0)] = 1.0;
        a[(i, 1)] = p[0];
        a[(i, 2)] = p[0] * p[0];
        b[i] = p[1];
    }
    let ata = a.transpose() * &a;
    let atb = a.transpose() * b;
    let sol = ata.try_inverse()? * atb;
    let c = [sol[0], sol[1], sol[2]];
    c.iter().all(|v| v.is_finite()).then_some(c)
}

fn eval_parabola(c: [f64; 3], x: f64) -> f64 {
    c[0] + c[1] * x + c[2] * x * x
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eye() -> EyePhysicalModel {
        EyePhysicalModel {
            center: [50.0, 50.0],
            radius: 40.0,
        }
    }

    #[test]
    fn no_bright_pixels_and_no_eyelids_is_all_ones() {
        let img = GrayImage::from_pixel(80, 60, Luma([100]));
        let mask = build_mask(&img, None, &eye(), &MaskConfig::default());
        assert!(mask.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn bright_pixels_are_excluded() {
        let mut img = GrayImage::from_pixel(80, 60, Luma([100]));
        img.put_pixel(10, 10, Luma([240]));
        let mask = build_mask(&img, None, &eye(), &MaskConfig::default());
        assert_eq!(mask.get_pixel(10, 10)[0], 0);
        assert_eq!(mask.get_pixel(11, 10)[0], 255);
    }

    #[test]
    fn eyelid_band_masks_out_top_and_bottom() {
        let img = GrayImage::from_pixel(100, 100, Luma([100]));
        let lids = Eyelids {
            upper: [[30.0, 25.0], [43.0, 22.0], [57.0, 22.0], [70.0, 25.0]],
            lower: [[30.0, 75.0], [43.0, 78.0], [57.0, 78.0], [70.0, 75.0]],
        };
        let cfg = MaskConfig {
            eyelid_margin_px: 0.0,
            ..Default::default()
        };
        let mask = build_mask(&img, Some(&lids), &eye(), &cfg);
        assert_eq!(mask.get_pixel(50, 50)[0], 255);
        assert_eq!(mask.get_pixel(50, 5)[0], 0);
        assert_eq!(mask.get_pixel(50, 95)[0], 0);
    }

    #[test]
    fn margin_widens_the_excluded_lid() {
        let img = GrayImage::from_pixel(100, 100, Luma([100]));
        let lids = Eyelids {
            upper: [[30.0, 30.0], [43.0, 30.0], [57.0, 30.0], [70.0, 30.0]],
            lower: [[30.0, 70.0], [43.0, 70.0], [57.0, 70.0], [70.0, 70.0]],
        };
        let tight = build_mask(
            &img,
            Some(&lids),
            &eye(),
            &MaskConfig {
                eyelid_margin_px: 0.0,
                ..Default::default()
            },
        );
        let wide = build_mask(
            &img,
            Some(&lids),
            &eye(),
            &MaskConfig {
                eyelid_margin_px: 6.0,
                ..Default::default()
            },
        );
        let count = |m: &GrayImage| m.pixels().filter(|p| p[0] == 255).count();
        assert!(count(&wide) < count(&tight));
    }
}
