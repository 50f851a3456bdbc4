//! Ocular torsion from iris-pattern cross-correlation.
//!
//! An annular strip of the iris is unwrapped into a 1-D angular signature
//! (mean over a few radial samples per angle, mask-aware). The signature is
//! high-pass filtered to suppress illumination gradients and cyclically
//! cross-correlated against the session reference; the correlation peak,
//! refined on a finer grid, is the torsion angle.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ellipse::Ellipse;
use crate::imageops::bilinear_sample;
use crate::iris::IrisMeasurement;

/// Torsion tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorsionConfig {
    /// Angular bin width of the unwrapped strip, degrees.
    pub angular_resolution_deg: f64,
    /// The correlation peak is refined on a grid this many times finer than
    /// the angular resolution.
    pub interpolation_factor: u32,
    /// Width of the high-pass moving-average window, degrees.
    pub highpass_width_deg: f64,
    /// Torsion search and clamp bound, degrees.
    pub max_torsion_deg: f64,
    /// Radial samples averaged per angular bin.
    pub radial_samples: usize,
    /// Annulus inner edge as a fraction of the pupil→limbus band.
    pub band_inner_frac: f64,
    /// Annulus outer edge as a fraction of the pupil→limbus band.
    pub band_outer_frac: f64,
    /// Minimum fraction of valid angular bins for a usable strip.
    pub min_valid_fraction: f64,
    /// Emit the unwrapped strip as a debug image on every frame.
    pub keep_polar_debug: bool,
}

impl Default for TorsionConfig {
    fn default() -> Self {
        Self {
            angular_resolution_deg: 1.0,
            interpolation_factor: 10,
            highpass_width_deg: 15.0,
            max_torsion_deg: 25.0,
            radial_samples: 6,
            band_inner_frac: 0.25,
            band_outer_frac: 0.85,
            min_valid_fraction: 0.5,
            keep_polar_debug: false,
        }
    }
}

/// Angular iris signature: one value per angular bin plus validity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorsionReference {
    profile: Vec<f32>,
    valid: Vec<bool>,
    /// Resolution the profile was sampled at; a config change invalidates
    /// the reference.
    pub angular_resolution_deg: f64,
}

/// Result of the torsion computation for one frame.
#[derive(Debug, Clone)]
pub struct TorsionOutcome {
    /// Torsion angle in degrees relative to the reference, positive in the
    /// direction of increasing polar angle (+x toward +y in image
    /// coordinates). Zero when no reference existed or tracking was lost.
    pub angle_deg: f64,
    /// Correlation-peak margin in [0, 1]; 0 signals an unreliable value.
    pub quality: f64,
    /// Unwrapped polar strip, present when `keep_polar_debug` is set.
    pub polar_debug: Option<GrayImage>,
    /// A new reference captured this frame (first usable frame of a
    /// session, or after an explicit reset).
    pub new_reference: Option<TorsionReference>,
}

impl TorsionOutcome {
    fn unreliable(polar_debug: Option<GrayImage>) -> Self {
        Self {
            angle_deg: 0.0,
            quality: 0.0,
            polar_debug,
            new_reference: None,
        }
    }
}

/// Compute torsion for one frame.
///
/// With no `reference`, the current signature becomes the new reference and
/// the angle is 0 at full quality. Routine tracking loss (masked-out or
/// degenerate annulus) yields angle 0 at quality 0 and never an error.
pub fn compute_torsion(
    img: &GrayImage,
    mask: Option<&GrayImage>,
    pupil: &Ellipse,
    iris: &IrisMeasurement,
    reference: Option<&TorsionReference>,
    config: &TorsionConfig,
) -> TorsionOutcome {
    let band = iris.radius_px - pupil.mean_radius();
    let r_in = pupil.mean_radius() + band * config.band_inner_frac;
    let r_out = pupil.mean_radius() + band * config.band_outer_frac;
    if band <= 2.0 || r_out <= r_in + 1.0 {
        debug!(band, "torsion: degenerate iris annulus");
        return TorsionOutcome::unreliable(None);
    }

    let Some(strip) = unwrap_annulus(img, mask, [pupil.cx, pupil.cy], r_in, r_out, config) else {
        return TorsionOutcome::unreliable(None);
    };

    let polar_debug = config.keep_polar_debug.then(|| strip.to_image());

    let n_valid = strip.valid.iter().filter(|&&v| v).count();
    if (n_valid as f64) < config.min_valid_fraction * strip.profile.len() as f64 {
        debug!(
            n_valid,
            n_bins = strip.profile.len(),
            "torsion: strip mostly masked out"
        );
        return TorsionOutcome::unreliable(polar_debug);
    }

    let Some(reference) = reference else {
        return TorsionOutcome {
            angle_deg: 0.0,
            quality: 1.0,
            polar_debug,
            new_reference: Some(TorsionReference {
                profile: strip.profile,
                valid: strip.valid,
                angular_resolution_deg: config.angular_resolution_deg,
            }),
        };
    };
    if reference.profile.len() != strip.profile.len() {
        debug!("torsion: reference resolution mismatch, treating as unreliable");
        return TorsionOutcome::unreliable(polar_debug);
    }

    let hp_width = (config.highpass_width_deg / config.angular_resolution_deg).round() as usize;
    let ref_hp = highpass_cyclic(&reference.profile, &reference.valid, hp_width);
    let cur_hp = highpass_cyclic(&strip.profile, &strip.valid, hp_width);

    let max_shift = (config.max_torsion_deg / config.angular_resolution_deg).round() as i64;
    let Some((corr, peak_i)) = correlate_cyclic(
        &ref_hp,
        &reference.valid,
        &cur_hp,
        &strip.valid,
        max_shift,
    ) else {
        return TorsionOutcome::unreliable(polar_debug);
    };

    // Sub-bin refinement: evaluate the parabola through the peak and its
    // neighbors on an `interpolation_factor×` finer grid.
    let delta = refine_peak(&corr, peak_i, config.interpolation_factor);
    let shift = (peak_i as i64 - max_shift) as f64 + delta;
    let angle = (shift * config.angular_resolution_deg)
        .clamp(-config.max_torsion_deg, config.max_torsion_deg);

    TorsionOutcome {
        angle_deg: angle,
        quality: peak_quality(&corr, peak_i),
        polar_debug,
        new_reference: None,
    }
}

struct PolarStrip {
    profile: Vec<f32>,
    valid: Vec<bool>,
    raw: Vec<f32>,
    n_radial: usize,
}

impl PolarStrip {
    fn to_image(&self) -> GrayImage {
        let n_theta = self.profile.len() as u32;
        let mut img = GrayImage::new(n_theta, self.n_radial as u32);
        for (i, &v) in self.raw.iter().enumerate() {
            let x = (i / self.n_radial) as u32;
            let y = (i % self.n_radial) as u32;
            img.put_pixel(x, y, Luma([(v.clamp(0.0, 1.0) * 255.0) as u8]));
        }
        img
    }
}

/// Unwrap the annulus into per-angle mean intensities.
fn unwrap_annulus(
    img: &GrayImage,
    mask: Option<&GrayImage>,
    center: [f64; 2],
    r_in: f64,
    r_out: f64,
    config: &TorsionConfig,
) -> Option<PolarStrip> {
    let n_theta = (360.0 / config.angular_resolution_deg).round() as usize;
    let n_radial = config.radial_samples.max(1);
    if n_theta < 8 {
        return None;
    }

    let mut profile = vec![0.0f32; n_theta];
    let mut valid = vec![false; n_theta];
    let mut raw = vec![0.0f32; n_theta * n_radial];

    for ti in 0..n_theta {
        let theta = (ti as f64) * config.angular_resolution_deg.to_radians();
        let (dy, dx) = theta.sin_cos();
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for ri in 0..n_radial {
            let f = (ri as f64 + 0.5) / n_radial as f64;
            let r = r_in + f * (r_out - r_in);
            let x = (center[0] + dx * r) as f32;
            let y = (center[1] + dy * r) as f32;
            let Some(v) = bilinear_sample(img, x, y) else {
                continue;
            };
            let usable = mask.map_or(true, |m| {
                let (mx, my) = (x.round() as u32, y.round() as u32);
                mx < m.width() && my < m.height() && m.get_pixel(mx, my)[0] > 0
            });
            if usable {
                raw[ti * n_radial + ri] = v;
                sum += v;
                count += 1;
            }
        }
        // An angular bin counts when at least half its radial samples landed
        // on usable pixels.
        if count * 2 >= n_radial {
            profile[ti] = sum / count as f32;
            valid[ti] = true;
        }
    }

    Some(PolarStrip {
        profile,
        valid,
        raw,
        n_radial,
    })
}

/// Subtract a cyclic moving average of `width` bins from each valid bin.
fn highpass_cyclic(profile: &[f32], valid: &[bool], width: usize) -> Vec<f32> {
    let n = profile.len();
    let half = (width / 2).max(1) as i64;
    let mut out = vec![0.0f32; n];
    for i in 0..n {
        if !valid[i] {
            continue;
        }
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for k in -half..=half {
            let j = (i as i64 + k).rem_euclid(n as i64) as usize;
            if valid[j] {
                sum += profile[j];
                count += 1;
            }
        }
        if count > 0 {
            out[i] = profile[i] - sum / count as f32;
        }
    }
    out
}

/// Cyclic normalized cross-correlation of `cur` against `reference` for
/// shifts in [−max_shift, max_shift]. Returns the correlation curve and the
/// index of its maximum, or `None` when the valid overlap is too thin.
fn correlate_cyclic(
    reference: &[f32],
    ref_valid: &[bool],
    cur: &[f32],
    cur_valid: &[bool],
    max_shift: i64,
) -> Option<(Vec<f64>, usize)> {
    let n = reference.len() as i64;
    let mut corr = Vec::with_capacity((2 * max_shift + 1) as usize);

    for s in -max_shift..=max_shift {
        let mut dot = 0.0f64;
        let mut ref_sq = 0.0f64;
        let mut cur_sq = 0.0f64;
        let mut count = 0usize;
        for i in 0..n {
            let j = (i + s).rem_euclid(n) as usize;
            let i = i as usize;
            if ref_valid[i] && cur_valid[j] {
                dot += reference[i] as f64 * cur[j] as f64;
                ref_sq += (reference[i] as f64).powi(2);
                cur_sq += (cur[j] as f64).powi(2);
                count += 1;
            }
        }
        if count < (n as usize) / 4 {
            corr.push(f64::NEG_INFINITY);
            continue;
        }
        let norm = (ref_sq * cur_sq).sqrt();
        corr.push(if norm > 1e-12 { dot / norm } else { 0.0 });
    }

    let (peak_i, &peak) = corr
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;
    peak.is_finite().then_some((corr, peak_i))
}

/// Sub-bin peak offset in [−1, 1], quantized to 1/factor bins.
fn refine_peak(corr: &[f64], peak_i: usize, factor: u32) -> f64 {
    if peak_i == 0 || peak_i + 1 >= corr.len() {
        return 0.0;
    }
    let (l, c, r) = (corr[peak_i - 1], corr[peak_i], corr[peak_i + 1]);
    if !(l.is_finite() && r.is_finite()) {
        return 0.0;
    }
    let denom = l - 2.0 * c + r;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    let vertex = (0.5 * (l - r) / denom).clamp(-1.0, 1.0);
    let f = factor.max(1) as f64;
    (vertex * f).round() / f
}

/// Peak sharpness: margin of the peak over the mean correlation away from it.
fn peak_quality(corr: &[f64], peak_i: usize) -> f64 {
    let peak = corr[peak_i];
    let mut sum = 0.0;
    let mut count = 0usize;
    for (i, &v) in corr.iter().enumerate() {
        if (i as i64 - peak_i as i64).abs() > 2 && v.is_finite() {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        return peak.clamp(0.0, 1.0);
    }
    (peak - sum / count as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{draw_eye_image, EyeSceneParams};

    fn scene(rotation_deg: f64) -> (GrayImage, Ellipse, IrisMeasurement) {
        let params = EyeSceneParams {
            iris_rotation_deg: rotation_deg,
            ..Default::default()
        };
        let img = draw_eye_image(&params);
        let pupil = Ellipse {
            cx: params.center[0],
            cy: params.center[1],
            a: params.pupil_radius,
            b: params.pupil_radius,
            angle: 0.0,
        };
        let iris = IrisMeasurement {
            radius_px: params.iris_radius,
            quality: 1.0,
        };
        (img, pupil, iris)
    }

    #[test]
    fn first_frame_captures_reference_at_zero() {
        let (img, pupil, iris) = scene(0.0);
        let out = compute_torsion(&img, None, &pupil, &iris, None, &TorsionConfig::default());
        assert_eq!(out.angle_deg, 0.0);
        assert_eq!(out.quality, 1.0);
        assert!(out.new_reference.is_some());
    }

    #[test]
    fn round_trip_against_own_reference_is_zero() {
        let (img, pupil, iris) = scene(0.0);
        let cfg = TorsionConfig::default();
        let reference = compute_torsion(&img, None, &pupil, &iris, None, &cfg)
            .new_reference
            .unwrap();
        let out = compute_torsion(&img, None, &pupil, &iris, Some(&reference), &cfg);
        let resolution = cfg.angular_resolution_deg / cfg.interpolation_factor as f64;
        assert!(out.angle_deg.abs() <= resolution, "angle = {}", out.angle_deg);
        assert!(out.quality > 0.5, "quality = {}", out.quality);
    }

    #[test]
    fn recovers_injected_rotation() {
        let cfg = TorsionConfig::default();
        let (ref_img, pupil, iris) = scene(0.0);
        let reference = compute_torsion(&ref_img, None, &pupil, &iris, None, &cfg)
            .new_reference
            .unwrap();

        for injected in [-6.0, 4.0, 9.0] {
            let (img, pupil, iris) = scene(injected);
            let out = compute_torsion(&img, None, &pupil, &iris, Some(&reference), &cfg);
            assert!(
                (out.angle_deg - injected).abs() <= 1.0,
                "injected {} recovered {}",
                injected,
                out.angle_deg
            );
            assert!(out.quality > 0.2);
        }
    }

    #[test]
    fn angle_is_clamped_to_max_torsion() {
        let cfg = TorsionConfig {
            max_torsion_deg: 5.0,
            ..Default::default()
        };
        let (ref_img, pupil, iris) = scene(0.0);
        let reference = compute_torsion(&ref_img, None, &pupil, &iris, None, &cfg)
            .new_reference
            .unwrap();
        let (img, pupil, iris) = scene(12.0);
        let out = compute_torsion(&img, None, &pupil, &iris, Some(&reference), &cfg);
        assert!(out.angle_deg.abs() <= 5.0 + 1e-9);
    }

    #[test]
    fn fully_masked_annulus_is_unreliable() {
        let (img, pupil, iris) = scene(0.0);
        let mask = GrayImage::new(img.width(), img.height()); // all zeros
        let out = compute_torsion(
            &img,
            Some(&mask),
            &pupil,
            &iris,
            None,
            &TorsionConfig::default(),
        );
        assert_eq!(out.angle_deg, 0.0);
        assert_eq!(out.quality, 0.0);
        assert!(out.new_reference.is_none());
    }

    #[test]
    fn debug_strip_has_expected_dimensions() {
        let cfg = TorsionConfig {
            keep_polar_debug: true,
            ..Default::default()
        };
        let (img, pupil, iris) = scene(0.0);
        let out = compute_torsion(&img, None, &pupil, &iris, None, &cfg);
        let polar = out.polar_debug.expect("debug image");
        assert_eq!(polar.width(), 360);
        assert_eq!(polar.height(), cfg.radial_samples as u32);
    }
}
