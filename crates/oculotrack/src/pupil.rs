//! Pupil search and refinement.
//!
//! The fast pass thresholds dark pixels in the ROI and seeds an ellipse from
//! blob moments. The refinement pass re-estimates the boundary sub-pixel by
//! ray casting against the eyelid/reflection mask and robust-fits an ellipse.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blob::{find_blobs, select_largest};
use crate::ellipse::{fit_ellipse_ransac, Ellipse, RansacConfig};
use crate::imageops::{bilinear_sample, binarize, Roi};

/// Pupil candidate search method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PupilMethod {
    /// Largest dark connected component, ellipse from its moments.
    #[default]
    Blob,
    /// Center of mass of all dark pixels, ellipse from their joint moments.
    /// Cheaper and more tolerant of fragmented thresholding.
    Centroid,
}

/// Pupil tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PupilConfig {
    /// Candidate search method.
    pub method: PupilMethod,
    /// Pixels at or below this intensity count as pupil-dark.
    pub dark_threshold: u8,
    /// Reject candidates with equivalent radius below this, in pixels.
    pub min_radius_px: f64,
    /// Reject candidates more eccentric than this axis ratio.
    pub max_aspect_ratio: f64,
    /// Rays cast from the rough center during refinement.
    pub refine_rays: usize,
    /// Radial sampling step during refinement, pixels.
    pub refine_step_px: f32,
    /// Robust fit controls for the refinement pass.
    pub ransac: RansacConfig,
}

impl Default for PupilConfig {
    fn default() -> Self {
        Self {
            method: PupilMethod::Blob,
            dark_threshold: 60,
            min_radius_px: 3.0,
            max_aspect_ratio: 3.0,
            refine_rays: 64,
            refine_step_px: 0.5,
            ransac: RansacConfig::default(),
        }
    }
}

/// Locate the pupil candidate in `roi`.
///
/// `previous` breaks area ties toward the last frame's pupil center. Returns
/// `None` on blink or off-axis frames; never panics on empty input.
pub fn find_pupil(
    img: &GrayImage,
    roi: Roi,
    config: &PupilConfig,
    previous: Option<[f64; 2]>,
) -> Option<Ellipse> {
    if roi.area() == 0 {
        return None;
    }
    let threshold = config.dark_threshold;
    let dark = binarize(img, roi, |p| p <= threshold);
    let blobs = find_blobs(&dark);
    if blobs.is_empty() {
        return None;
    }

    let candidate = match config.method {
        PupilMethod::Blob => select_largest(&blobs, previous)?.to_ellipse()?,
        PupilMethod::Centroid => joint_moments_ellipse(&blobs)?,
    };

    if candidate.mean_radius() < config.min_radius_px {
        debug!(
            radius = candidate.mean_radius(),
            min = config.min_radius_px,
            "pupil candidate below minimum radius"
        );
        return None;
    }
    if candidate.aspect_ratio() > config.max_aspect_ratio {
        debug!(
            aspect = candidate.aspect_ratio(),
            "pupil candidate too eccentric"
        );
        return None;
    }
    Some(candidate)
}

/// Re-fit the pupil boundary sub-pixel against the mask.
///
/// Walks `refine_rays` rays outward from the rough center, records the first
/// dark→light threshold crossing on each (linear sub-sample interpolation),
/// drops points the mask excludes, and robust-fits an ellipse. Falls back to
/// `None` when too few boundary points survive; the caller keeps the rough
/// estimate in that case.
pub fn refine_pupil(
    img: &GrayImage,
    mask: Option<&GrayImage>,
    rough: &Ellipse,
    config: &PupilConfig,
) -> Option<Ellipse> {
    let threshold = config.dark_threshold as f32 / 255.0;
    let r_max = (rough.mean_radius() * 2.0) as f32;
    let mut points = Vec::with_capacity(config.refine_rays);

    for i in 0..config.refine_rays {
        let theta = std::f64::consts::TAU * i as f64 / config.refine_rays as f64;
        let (dy, dx) = theta.sin_cos();
        let mut prev: Option<(f32, f32)> = None;

        let mut r = config.refine_step_px;
        while r <= r_max {
            let x = rough.cx as f32 + dx as f32 * r;
            let y = rough.cy as f32 + dy as f32 * r;
            let Some(v) = bilinear_sample(img, x, y) else {
                break;
            };
            if let Some((pr, pv)) = prev {
                if pv <= threshold && v > threshold {
                    // Sub-pixel crossing between the two samples.
                    let t = (threshold - pv) / (v - pv);
                    let rc = pr + t * (r - pr);
                    let bx = rough.cx + dx * rc as f64;
                    let by = rough.cy + dy * rc as f64;
                    let usable = mask.map_or(true, |m| {
                        let (mx, my) = (bx.round() as i64, by.round() as i64);
                        mx >= 0
                            && my >= 0
                            && (mx as u32) < m.width()
                            && (my as u32) < m.height()
                            && m.get_pixel(mx as u32, my as u32)[0] > 0
                    });
                    if usable {
                        points.push([bx, by]);
                    }
                    break;
                }
            }
            prev = Some((r, v));
            r += config.refine_step_px;
        }
    }

    if points.len() < config.ransac.min_inliers.max(6) {
        debug!(n_points = points.len(), "pupil refinement: too few boundary points");
        return None;
    }

    let refined = fit_ellipse_ransac(&points, &config.ransac).ok()?;
    (refined.aspect_ratio() <= config.max_aspect_ratio
        && refined.mean_radius() >= config.min_radius_px)
        .then_some(refined)
}

/// Ellipse from the pooled moments of every dark blob.
fn joint_moments_ellipse(blobs: &[crate::blob::Blob]) -> Option<Ellipse> {
    let total: u64 = blobs.iter().map(|b| b.area).sum();
    if total == 0 {
        return None;
    }
    let tf = total as f64;
    let cx = blobs
        .iter()
        .map(|b| b.centroid[0] * b.area as f64)
        .sum::<f64>()
        / tf;
    let cy = blobs
        .iter()
        .map(|b| b.centroid[1] * b.area as f64)
        .sum::<f64>()
        / tf;
    // Pooled central moments via the parallel-axis shift of each blob.
    let mut mu20 = 0.0;
    let mut mu02 = 0.0;
    let mut mu11 = 0.0;
    for b in blobs {
        let w = b.area as f64 / tf;
        let dx = b.centroid[0] - cx;
        let dy = b.centroid[1] - cy;
        mu20 += w * (b.moments[0] + dx * dx);
        mu02 += w * (b.moments[1] + dy * dy);
        mu11 += w * (b.moments[2] + dx * dy);
    }
    crate::blob::Blob {
        area: total,
        centroid: [cx, cy],
        moments: [mu20, mu02, mu11],
        bbox: [0, 0, 0, 0],
    }
    .to_ellipse()
}
