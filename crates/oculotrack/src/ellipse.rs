//! Ellipse geometry and robust fitting for pupil refinement.
//!
//! Direct least-squares conic fitting (Fitzgibbon et al., 1999) with point
//! normalization, plus a seeded RANSAC wrapper used by the pupil refinement
//! pass to reject boundary points that leak past the eyelid/reflection mask.

use nalgebra::{DMatrix, Matrix3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Errors from ellipse fitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitError {
    /// Too few points for the requested operation.
    TooFewPoints { needed: usize, got: usize },
    /// RANSAC could not find enough inliers.
    InsufficientInliers { needed: usize, found: usize },
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few points: need {}, got {}", needed, got)
            }
            Self::InsufficientInliers { needed, found } => {
                write!(f, "insufficient inliers: need {}, found {}", needed, found)
            }
        }
    }
}

impl std::error::Error for FitError {}

/// Geometric ellipse parameters in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center x.
    pub cx: f64,
    /// Center y.
    pub cy: f64,
    /// Semi-major axis length.
    pub a: f64,
    /// Semi-minor axis length.
    pub b: f64,
    /// Rotation of the major axis from +x, radians, in (−π/2, π/2].
    pub angle: f64,
}

impl Ellipse {
    /// Positive, finite geometry.
    pub fn is_valid(&self) -> bool {
        self.a > 0.0
            && self.b > 0.0
            && self.a.is_finite()
            && self.b.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.angle.is_finite()
    }

    /// Mean of the two semi-axes; the pupil "radius" reported downstream.
    pub fn mean_radius(&self) -> f64 {
        0.5 * (self.a + self.b)
    }

    /// Aspect ratio, always ≥ 1.
    pub fn aspect_ratio(&self) -> f64 {
        if self.a >= self.b {
            self.a / self.b
        } else {
            self.b / self.a
        }
    }

    /// Sample `n` points on the boundary.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (sin_a, cos_a) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = std::f64::consts::TAU * (i as f64) / (n as f64);
                let px = self.a * t.cos();
                let py = self.b * t.sin();
                [
                    self.cx + cos_a * px - sin_a * py,
                    self.cy + sin_a * px + cos_a * py,
                ]
            })
            .collect()
    }

    /// General conic coefficients [A, B, C, D, E, F] of this ellipse.
    fn conic_coeffs(&self) -> [f64; 6] {
        let (sin_a, cos_a) = self.angle.sin_cos();
        let a2 = self.a * self.a;
        let b2 = self.b * self.b;

        let ca = cos_a * cos_a / a2 + sin_a * sin_a / b2;
        let cb = 2.0 * cos_a * sin_a * (1.0 / a2 - 1.0 / b2);
        let cc = sin_a * sin_a / a2 + cos_a * cos_a / b2;
        let cd = -2.0 * ca * self.cx - cb * self.cy;
        let ce = -cb * self.cx - 2.0 * cc * self.cy;
        let cf = ca * self.cx * self.cx
            + cb * self.cx * self.cy
            + cc * self.cy * self.cy
            - 1.0;
        [ca, cb, cc, cd, ce, cf]
    }

    /// First-order geometric distance from a point to the boundary
    /// (algebraic distance over gradient magnitude, Sampson).
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        let [ca, cb, cc, cd, ce, cf] = self.conic_coeffs();
        let alg = ca * x * x + cb * x * y + cc * y * y + cd * x + ce * y + cf;
        let gx = 2.0 * ca * x + cb * y + cd;
        let gy = cb * x + 2.0 * cc * y + ce;
        let grad2 = gx * gx + gy * gy;
        if grad2 < 1e-30 {
            return alg.abs();
        }
        alg.abs() / grad2.sqrt()
    }
}

/// Configuration for RANSAC ellipse fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RansacConfig {
    /// Maximum number of iterations.
    pub max_iters: usize,
    /// Inlier threshold, Sampson distance in pixels.
    pub inlier_threshold: f64,
    /// Minimum number of inliers for a valid model.
    pub min_inliers: usize,
    /// RNG seed for reproducibility.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 300,
            inlier_threshold: 1.0,
            min_inliers: 8,
            seed: 42,
        }
    }
}

/// Fit an ellipse to ≥ 6 points with the direct least-squares method.
///
/// Points are normalized (centroid shift + isotropic scale) before building
/// the design matrix; the ellipse constraint B² − 4AC < 0 is enforced through
/// the constrained eigensystem. Returns `None` when the solution is not a
/// proper finite ellipse.
pub fn fit_ellipse_direct(points: &[[f64; 2]]) -> Option<Ellipse> {
    let n = points.len();
    if n < 6 {
        return None;
    }

    // Normalization: centroid at origin, mean distance √2.
    let nf = n as f64;
    let mean_x = points.iter().map(|p| p[0]).sum::<f64>() / nf;
    let mean_y = points.iter().map(|p| p[1]).sum::<f64>() / nf;
    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - mean_x).powi(2) + (p[1] - mean_y).powi(2)).sqrt())
        .sum::<f64>()
        / nf;
    let scale = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    // Design matrix D = [x², xy, y², x, y, 1] in normalized coordinates.
    let mut d = DMatrix::<f64>::zeros(n, 6);
    for (i, &[px, py]) in points.iter().enumerate() {
        let x = (px - mean_x) * scale;
        let y = (py - mean_y) * scale;
        d[(i, 0)] = x * x;
        d[(i, 1)] = x * y;
        d[(i, 2)] = y * y;
        d[(i, 3)] = x;
        d[(i, 4)] = y;
        d[(i, 5)] = 1.0;
    }

    // Scatter matrix split into 3×3 blocks.
    let s = d.transpose() * &d;
    let s11 = s.fixed_view::<3, 3>(0, 0).into_owned();
    let s12 = s.fixed_view::<3, 3>(0, 3).into_owned();
    let s22 = s.fixed_view::<3, 3>(3, 3).into_owned();

    // Ellipse constraint matrix C1 and the reduced system C1⁻¹ (S11 − S12 S22⁻¹ S12ᵀ).
    let c1 = Matrix3::new(0.0, 0.0, 2.0, 0.0, -1.0, 0.0, 2.0, 0.0, 0.0);
    let s22_inv = s22.try_inverse()?;
    let reduced = s11 - s12 * s22_inv * s12.transpose();
    let system = c1.try_inverse()? * reduced;

    let a1 = constrained_eigenvector(&system)?;
    let a2 = -s22_inv * s12.transpose() * a1;

    // Denormalize back to image coordinates.
    let coeffs = denormalize_conic(
        &Vector6::new(a1[0], a1[1], a1[2], a2[0], a2[1], a2[2]),
        mean_x,
        mean_y,
        scale,
    );

    let e = conic_to_ellipse(coeffs)?;
    e.is_valid().then_some(e)
}

/// Robust ellipse fit: 6-point minimal samples, Sampson-distance inlier
/// scoring, final refit on the inlier set.
pub fn fit_ellipse_ransac(
    points: &[[f64; 2]],
    config: &RansacConfig,
) -> Result<Ellipse, FitError> {
    use rand::prelude::*;

    let n = points.len();
    if n < 6 {
        return Err(FitError::TooFewPoints { needed: 6, got: n });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..n).collect();
    let mut best: Option<(usize, Ellipse, Vec<bool>)> = None;

    for _ in 0..config.max_iters {
        // Partial Fisher–Yates: 6 distinct indices.
        for i in 0..6 {
            let j = rng.gen_range(i..n);
            indices.swap(i, j);
        }
        let sample: Vec<[f64; 2]> = indices[..6].iter().map(|&i| points[i]).collect();
        let Some(model) = fit_ellipse_direct(&sample) else {
            continue;
        };

        let mut mask = vec![false; n];
        let mut count = 0usize;
        for (i, &[x, y]) in points.iter().enumerate() {
            if model.sampson_distance(x, y) < config.inlier_threshold {
                mask[i] = true;
                count += 1;
            }
        }

        let improved = best.as_ref().map_or(true, |(c, _, _)| count > *c);
        if improved {
            let done = count * 10 > n * 9;
            best = Some((count, model, mask));
            if done {
                break;
            }
        }
    }

    let (count, model, mask) = best.ok_or(FitError::InsufficientInliers {
        needed: config.min_inliers,
        found: 0,
    })?;
    if count < config.min_inliers {
        return Err(FitError::InsufficientInliers {
            needed: config.min_inliers,
            found: count,
        });
    }

    let inliers: Vec<[f64; 2]> = mask
        .iter()
        .zip(points)
        .filter(|(&m, _)| m)
        .map(|(_, &p)| p)
        .collect();
    Ok(fit_ellipse_direct(&inliers).unwrap_or(model))
}

/// Eigenvector of the reduced system satisfying the ellipse constraint
/// 4 v₀ v₂ − v₁² > 0. Eigenvalues come from the characteristic cubic; the
/// eigenvector is the largest-norm adjugate row of (A − λI).
fn constrained_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let a = system;
    let tr = a[(0, 0)] + a[(1, 1)] + a[(2, 2)];
    let minor_sum = a[(0, 0)] * a[(1, 1)] - a[(0, 1)] * a[(1, 0)]
        + a[(0, 0)] * a[(2, 2)]
        - a[(0, 2)] * a[(2, 0)]
        + a[(1, 1)] * a[(2, 2)]
        - a[(1, 2)] * a[(2, 1)];
    let det = a.determinant();

    let mut best: Option<(f64, Vector3<f64>)> = None;
    for ev in cubic_real_roots(-tr, minor_sum, -det) {
        let shifted = system - Matrix3::identity() * ev;
        let Some(v) = adjugate_null_vector(&shifted) else {
            continue;
        };
        if 4.0 * v[0] * v[2] - v[1] * v[1] > 0.0 {
            let better = best.as_ref().map_or(true, |(b, _)| ev.abs() < *b);
            if better {
                best = Some((ev.abs(), v));
            }
        }
    }
    best.map(|(_, v)| v)
}

/// Null vector of a near-singular 3×3 matrix via its largest-norm adjugate row.
fn adjugate_null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let rows = [
        Vector3::new(
            m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)],
            -(m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)]),
            m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)],
        ),
        Vector3::new(
            -(m[(0, 1)] * m[(2, 2)] - m[(0, 2)] * m[(2, 1)]),
            m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)],
            -(m[(0, 0)] * m[(2, 1)] - m[(0, 1)] * m[(2, 0)]),
        ),
        Vector3::new(
            m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)],
            -(m[(0, 0)] * m[(1, 2)] - m[(0, 2)] * m[(1, 0)]),
            m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
        ),
    ];
    let best = rows
        .iter()
        .max_by(|a, b| a.norm_squared().partial_cmp(&b.norm_squared()).unwrap())?;
    let n2 = best.norm_squared();
    if n2 < 1e-30 {
        return None;
    }
    Some(best / n2.sqrt())
}

/// Real roots of x³ + bx² + cx + d = 0.
fn cubic_real_roots(b: f64, c: f64, d: f64) -> Vec<f64> {
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;
    let disc = -4.0 * p * p * p - 27.0 * q * q;

    if disc >= 0.0 {
        let r = (-p / 3.0).sqrt();
        let cos_arg = if r.abs() < 1e-15 {
            0.0
        } else {
            (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0)
        };
        let theta = cos_arg.acos();
        let two_r = 2.0 * r;
        vec![
            two_r * (theta / 3.0).cos() + shift,
            two_r * ((theta + 2.0 * std::f64::consts::PI) / 3.0).cos() + shift,
            two_r * ((theta + 4.0 * std::f64::consts::PI) / 3.0).cos() + shift,
        ]
    } else {
        let sqrt_disc = (q * q / 4.0 + p * p * p / 27.0).sqrt();
        vec![(-q / 2.0 + sqrt_disc).cbrt() + (-q / 2.0 - sqrt_disc).cbrt() + shift]
    }
}

/// Undo the point normalization on fitted conic coefficients.
fn denormalize_conic(c: &Vector6<f64>, mean_x: f64, mean_y: f64, scale: f64) -> [f64; 6] {
    // Substituting x' = s(x − mx), y' = s(y − my) into the normalized conic.
    let (a, b, cc, d, e, f) = (c[0], c[1], c[2], c[3], c[4], c[5]);
    let s = scale;
    let s2 = s * s;

    let a2 = a * s2;
    let b2 = b * s2;
    let c2 = cc * s2;
    let d2 = -2.0 * a * s2 * mean_x - b * s2 * mean_y + d * s;
    let e2 = -b * s2 * mean_x - 2.0 * cc * s2 * mean_y + e * s;
    let f2 = a * s2 * mean_x * mean_x
        + b * s2 * mean_x * mean_y
        + cc * s2 * mean_y * mean_y
        - d * s * mean_x
        - e * s * mean_y
        + f;
    [a2, b2, c2, d2, e2, f2]
}

/// Geometric parameters of a conic known to be an ellipse.
fn conic_to_ellipse(coeffs: [f64; 6]) -> Option<Ellipse> {
    let [a, b, c, d, e, f] = coeffs;

    let disc = b * b - 4.0 * a * c;
    if disc >= 0.0 {
        return None;
    }

    let denom = -disc;
    let cx = (b * e - 2.0 * c * d) / denom;
    let cy = (b * d - 2.0 * a * e) / denom;

    let angle = if (a - c).abs() < 1e-15 {
        if b > 0.0 {
            std::f64::consts::FRAC_PI_4
        } else if b < 0.0 {
            -std::f64::consts::FRAC_PI_4
        } else {
            0.0
        }
    } else {
        0.5 * b.atan2(a - c)
    };

    let sum = a + c;
    let diff = ((a - c).powi(2) + b * b).sqrt();
    let l1 = (sum + diff) / 2.0;
    let l2 = (sum - diff) / 2.0;

    let f_center = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;
    if f_center.abs() < 1e-15 {
        return None;
    }
    let a_sq = -f_center / l1;
    let b_sq = -f_center / l2;
    if a_sq <= 0.0 || b_sq <= 0.0 {
        return None;
    }

    let (semi_a, semi_b, angle) = if a_sq >= b_sq {
        (a_sq.sqrt(), b_sq.sqrt(), angle)
    } else {
        (b_sq.sqrt(), a_sq.sqrt(), angle + std::f64::consts::FRAC_PI_2)
    };

    Some(Ellipse {
        cx,
        cy,
        a: semi_a,
        b: semi_b,
        angle: normalize_angle(angle),
    })
}

/// Wrap into (−π/2, π/2].
fn normalize_angle(mut angle: f64) -> f64 {
    let pi = std::f64::consts::PI;
    while angle > pi / 2.0 {
        angle -= pi;
    }
    while angle <= -pi / 2.0 {
        angle += pi;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn reference_ellipse() -> Ellipse {
        Ellipse {
            cx: 60.0,
            cy: 45.0,
            a: 22.0,
            b: 16.0,
            angle: 0.4,
        }
    }

    #[test]
    fn direct_fit_recovers_clean_ellipse() {
        let e = reference_ellipse();
        let pts = e.sample_points(64);
        let fitted = fit_ellipse_direct(&pts).expect("fit");
        assert_relative_eq!(fitted.cx, e.cx, epsilon = 1e-6);
        assert_relative_eq!(fitted.cy, e.cy, epsilon = 1e-6);
        assert_relative_eq!(fitted.a, e.a, epsilon = 1e-6);
        assert_relative_eq!(fitted.b, e.b, epsilon = 1e-6);
        assert_relative_eq!(fitted.angle, e.angle, epsilon = 1e-6);
    }

    #[test]
    fn direct_fit_rejects_degenerate_input() {
        // Collinear points cannot form an ellipse.
        let pts: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, 2.0 * i as f64]).collect();
        assert!(fit_ellipse_direct(&pts).is_none());
        assert!(fit_ellipse_direct(&pts[..4]).is_none());
    }

    #[test]
    fn ransac_survives_outliers() {
        let e = reference_ellipse();
        let mut pts = e.sample_points(80);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            pts.push([rng.gen_range(0.0..120.0), rng.gen_range(0.0..90.0)]);
        }
        let cfg = RansacConfig {
            inlier_threshold: 0.5,
            min_inliers: 40,
            ..Default::default()
        };
        let fitted = fit_ellipse_ransac(&pts, &cfg).expect("ransac");
        assert_relative_eq!(fitted.cx, e.cx, epsilon = 0.5);
        assert_relative_eq!(fitted.cy, e.cy, epsilon = 0.5);
        assert_relative_eq!(fitted.a, e.a, epsilon = 0.5);
        assert_relative_eq!(fitted.b, e.b, epsilon = 0.5);
    }

    #[test]
    fn ransac_reports_too_few_points() {
        let err = fit_ellipse_ransac(&[[0.0, 0.0]; 3], &RansacConfig::default()).unwrap_err();
        assert_eq!(err, FitError::TooFewPoints { needed: 6, got: 3 });
    }

    #[test]
    fn sampson_distance_is_zero_on_boundary() {
        let e = reference_ellipse();
        for p in e.sample_points(16) {
            assert!(e.sampson_distance(p[0], p[1]) < 1e-9);
        }
        assert!(e.sampson_distance(e.cx, e.cy) > 1.0);
    }
}
