//! Iris (limbus) boundary estimation.
//!
//! Radial intensity profiles are sampled from just outside the pupil toward
//! the sclera; the limbus shows up as the strongest positive radial
//! derivative (dark iris → bright sclera). Per-ray peaks are aggregated with
//! a median and scored by how many rays agree with it.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ellipse::Ellipse;
use crate::eye::EyePhysicalModel;
use crate::imageops::bilinear_sample;

/// Iris tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisConfig {
    /// Number of radial rays.
    pub n_rays: usize,
    /// Radial sampling step, pixels.
    pub r_step_px: f32,
    /// Outer search bound as a multiple of the pupil mean radius.
    pub search_factor: f64,
    /// Keep rays within this elevation from horizontal, degrees; steeper
    /// rays usually run into a lid.
    pub max_ray_elevation_deg: f64,
    /// Minimum fraction of rays whose peak agrees with the median radius.
    pub min_consistency: f64,
    /// Minimum number of rays with a usable profile.
    pub min_rays: usize,
    /// Fallback radius as a fraction of the eye-model radius when detection
    /// is ambiguous and no previous radius is known.
    pub nominal_radius_factor: f64,
}

impl Default for IrisConfig {
    fn default() -> Self {
        Self {
            n_rays: 32,
            r_step_px: 0.5,
            search_factor: 3.0,
            max_ray_elevation_deg: 60.0,
            min_consistency: 0.4,
            min_rays: 8,
            nominal_radius_factor: 0.55,
        }
    }
}

/// Iris boundary estimate for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrisMeasurement {
    /// Limbus radius from the pupil center, pixels.
    pub radius_px: f64,
    /// Agreement score in [0, 1]; 0 marks a fallback value.
    pub quality: f64,
}

/// Estimate the iris boundary radius.
///
/// Ambiguous boundaries (occluded, low consistency, too few rays) degrade to
/// `last_radius` or the nominal eye-model fraction with quality 0; this
/// function never fails outright.
pub fn find_iris(
    img: &GrayImage,
    mask: Option<&GrayImage>,
    pupil: &Ellipse,
    eye: &EyePhysicalModel,
    config: &IrisConfig,
    last_radius: Option<f64>,
) -> IrisMeasurement {
    let r_inner = (pupil.mean_radius() * 1.1) as f32;
    let r_outer = ((pupil.mean_radius() * config.search_factor).min(eye.radius)) as f32;
    let fallback = || IrisMeasurement {
        radius_px: last_radius
            .unwrap_or(eye.radius * config.nominal_radius_factor)
            .max(pupil.mean_radius() * 1.2),
        quality: 0.0,
    };
    if r_outer <= r_inner + 4.0 * config.r_step_px {
        return fallback();
    }

    let max_sin = config.max_ray_elevation_deg.to_radians().sin();
    let mut peaks: Vec<f32> = Vec::with_capacity(config.n_rays);

    for i in 0..config.n_rays {
        let theta = std::f64::consts::TAU * i as f64 / config.n_rays as f64;
        let (dy, dx) = theta.sin_cos();
        if dy.abs() > max_sin {
            continue;
        }
        if let Some(r) = ray_peak(img, mask, [pupil.cx, pupil.cy], [dx, dy], r_inner, r_outer, config.r_step_px) {
            peaks.push(r);
        }
    }

    if peaks.len() < config.min_rays {
        debug!(n_rays = peaks.len(), "iris: too few usable rays, falling back");
        return fallback();
    }

    let mid = peaks.len() / 2;
    let (_, median, _) = peaks.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap());
    let r_star = *median;

    // Agreement window: a few radial steps, floored at 2 px.
    let delta = (4.0 * config.r_step_px).max(2.0);
    let n_close = peaks.iter().filter(|&&r| (r - r_star).abs() <= delta).count();
    let consistency = n_close as f64 / peaks.len() as f64;

    if consistency < config.min_consistency {
        debug!(consistency, "iris: inconsistent peaks, falling back");
        return fallback();
    }

    IrisMeasurement {
        radius_px: r_star as f64,
        quality: consistency,
    }
}

/// Radius of the strongest positive radial derivative along one ray, or
/// `None` when the profile is mostly masked out or featureless.
fn ray_peak(
    img: &GrayImage,
    mask: Option<&GrayImage>,
    center: [f64; 2],
    dir: [f64; 2],
    r_inner: f32,
    r_outer: f32,
    r_step: f32,
) -> Option<f32> {
    let n = ((r_outer - r_inner) / r_step) as usize + 1;
    if n < 5 {
        return None;
    }
    let mut vals = Vec::with_capacity(n);
    let mut radii = Vec::with_capacity(n);
    for k in 0..n {
        let r = r_inner + k as f32 * r_step;
        let x = center[0] as f32 + dir[0] as f32 * r;
        let y = center[1] as f32 + dir[1] as f32 * r;
        let v = bilinear_sample(img, x, y)?;
        if let Some(m) = mask {
            let (mx, my) = (x.round() as u32, y.round() as u32);
            if mx >= m.width() || my >= m.height() || m.get_pixel(mx, my)[0] == 0 {
                return None;
            }
        }
        vals.push(v);
        radii.push(r);
    }

    // Central-difference derivative with forward/backward ends, then a
    // 3-point moving average.
    let mut d = vec![0.0f32; n];
    d[0] = (vals[1] - vals[0]) / r_step;
    for i in 1..n - 1 {
        d[i] = (vals[i + 1] - vals[i - 1]) / (2.0 * r_step);
    }
    d[n - 1] = (vals[n - 1] - vals[n - 2]) / r_step;
    if n >= 5 {
        let mut left = d[0];
        let mut mid = d[1];
        for i in 1..n - 1 {
            let right = d[i + 1];
            d[i] = (left + mid + right) / 3.0;
            left = mid;
            mid = right;
        }
    }

    let (best_idx, best_val) = d
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;
    (*best_val > 0.0).then(|| radii[best_idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{draw_eye_image, EyeSceneParams};

    #[test]
    fn finds_limbus_on_rendered_eye() {
        let params = EyeSceneParams::default();
        let img = draw_eye_image(&params);
        let pupil = Ellipse {
            cx: params.center[0],
            cy: params.center[1],
            a: params.pupil_radius,
            b: params.pupil_radius,
            angle: 0.0,
        };
        let eye = EyePhysicalModel {
            center: params.center,
            radius: params.iris_radius * 1.8,
        };
        let m = find_iris(&img, None, &pupil, &eye, &IrisConfig::default(), None);
        assert!(m.quality > 0.0, "expected real detection");
        assert!(
            (m.radius_px - params.iris_radius).abs() <= 2.0,
            "limbus at {} expected {}",
            m.radius_px,
            params.iris_radius
        );
    }

    #[test]
    fn featureless_image_falls_back_to_nominal() {
        let img = GrayImage::from_pixel(120, 120, image::Luma([128]));
        let pupil = Ellipse {
            cx: 60.0,
            cy: 60.0,
            a: 12.0,
            b: 12.0,
            angle: 0.0,
        };
        let eye = EyePhysicalModel {
            center: [60.0, 60.0],
            radius: 50.0,
        };
        let cfg = IrisConfig::default();
        let m = find_iris(&img, None, &pupil, &eye, &cfg, None);
        assert_eq!(m.quality, 0.0);
        assert!((m.radius_px - 50.0 * cfg.nominal_radius_factor).abs() < 1e-9);
    }

    #[test]
    fn fallback_prefers_last_known_radius() {
        let img = GrayImage::from_pixel(120, 120, image::Luma([128]));
        let pupil = Ellipse {
            cx: 60.0,
            cy: 60.0,
            a: 12.0,
            b: 12.0,
            angle: 0.0,
        };
        let eye = EyePhysicalModel {
            center: [60.0, 60.0],
            radius: 50.0,
        };
        let m = find_iris(&img, None, &pupil, &eye, &IrisConfig::default(), Some(31.5));
        assert_eq!(m.quality, 0.0);
        assert!((m.radius_px - 31.5).abs() < 1e-9);
    }
}
