//! Synthetic eye scenes for image-based unit tests and benches.

use image::{GrayImage, Luma};

/// Parameters of a rendered synthetic eye.
#[derive(Debug, Clone)]
pub(crate) struct EyeSceneParams {
    pub width: u32,
    pub height: u32,
    /// Pupil/iris center in pixels.
    pub center: [f64; 2],
    pub pupil_radius: f64,
    pub iris_radius: f64,
    pub pupil_intensity: u8,
    pub sclera_intensity: u8,
    /// Rotation of the iris texture, degrees in increasing polar angle.
    pub iris_rotation_deg: f64,
    /// Glint centers relative to the eye center, pixels.
    pub glints: Vec<[f64; 2]>,
    pub glint_radius: f64,
    /// Gaussian blur applied to the finished scene; 0 disables.
    pub blur_sigma: f32,
}

impl Default for EyeSceneParams {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            center: [80.0, 60.0],
            pupil_radius: 12.0,
            iris_radius: 32.0,
            pupil_intensity: 20,
            sclera_intensity: 200,
            iris_rotation_deg: 0.0,
            // On the sclera, clear of the torsion annulus.
            glints: vec![[28.0, -22.0], [-28.0, -22.0]],
            glint_radius: 2.5,
            blur_sigma: 0.8,
        }
    }
}

/// Render a synthetic eye: dark pupil disk, angular iris texture, bright
/// sclera, glint disks, optional blur.
///
/// The iris intensity depends on the polar angle only, so rotating the
/// texture by `iris_rotation_deg` models pure ocular torsion.
pub(crate) fn draw_eye_image(params: &EyeSceneParams) -> GrayImage {
    let mut img = GrayImage::new(params.width, params.height);
    let rot = params.iris_rotation_deg.to_radians();

    for y in 0..params.height {
        for x in 0..params.width {
            let dx = x as f64 - params.center[0];
            let dy = y as f64 - params.center[1];
            let d = (dx * dx + dy * dy).sqrt();
            let pix = if d <= params.pupil_radius {
                params.pupil_intensity
            } else if d <= params.iris_radius {
                let theta = dy.atan2(dx) - rot;
                iris_texture(theta)
            } else {
                params.sclera_intensity
            };
            img.put_pixel(x, y, Luma([pix]));
        }
    }

    for g in &params.glints {
        let gx = params.center[0] + g[0];
        let gy = params.center[1] + g[1];
        for y in 0..params.height {
            for x in 0..params.width {
                let dx = x as f64 - gx;
                let dy = y as f64 - gy;
                if (dx * dx + dy * dy).sqrt() <= params.glint_radius {
                    img.put_pixel(x, y, Luma([250]));
                }
            }
        }
    }

    if params.blur_sigma > 0.0 {
        blur_gray(&img, params.blur_sigma)
    } else {
        img
    }
}

/// Multi-frequency angular pattern; mixed harmonics keep the angular
/// autocorrelation sharply peaked.
fn iris_texture(theta: f64) -> u8 {
    let v = 130.0
        + 22.0 * (3.0 * theta).sin()
        + 18.0 * (7.0 * theta + 1.3).sin()
        + 12.0 * (13.0 * theta + 2.1).sin();
    v.clamp(0.0, 255.0) as u8
}

/// Gaussian-blur a `GrayImage` via `imageproc`.
pub(crate) fn blur_gray(img: &GrayImage, sigma: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut f = image::ImageBuffer::<Luma<f32>, Vec<f32>>::new(w, h);
    for y in 0..h {
        for x in 0..w {
            f.put_pixel(x, y, Luma([img.get_pixel(x, y)[0] as f32 / 255.0]));
        }
    }
    let blurred = imageproc::filter::gaussian_blur_f32(&f, sigma);
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let v = blurred.get_pixel(x, y)[0].clamp(0.0, 1.0);
            out.put_pixel(x, y, Luma([(v * 255.0).round() as u8]));
        }
    }
    out
}
