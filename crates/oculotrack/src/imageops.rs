//! Small grayscale helpers shared by the tracking stages.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Rectangular region of interest in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// ROI covering a whole image.
    pub fn full(img: &GrayImage) -> Self {
        let (w, h) = img.dimensions();
        Self {
            x: 0,
            y: 0,
            width: w,
            height: h,
        }
    }

    /// ROI centered on a point with the given half extents, clamped to the
    /// image bounds. Degenerates to a zero-area ROI when the center lies
    /// outside the image.
    pub fn centered(center: [f64; 2], half_w: f64, half_h: f64, img: &GrayImage) -> Self {
        let (iw, ih) = img.dimensions();
        let x0 = (center[0] - half_w).floor().max(0.0) as u32;
        let y0 = (center[1] - half_h).floor().max(0.0) as u32;
        let x1 = ((center[0] + half_w).ceil().max(0.0) as u32).min(iw);
        let y1 = ((center[1] + half_h).ceil().max(0.0) as u32).min(ih);
        Self {
            x: x0.min(iw),
            y: y0.min(ih),
            width: x1.saturating_sub(x0.min(iw)),
            height: y1.saturating_sub(y0.min(ih)),
        }
    }

    /// Usable pixel count.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Sample a grayscale image at a sub-pixel position using bilinear
/// interpolation. Returns intensity in [0, 1], or `None` out of bounds.
#[inline]
pub fn bilinear_sample(img: &GrayImage, x: f32, y: f32) -> Option<f32> {
    let (w, h) = img.dimensions();
    if w < 2 || h < 2 || x < 0.0 || y < 0.0 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    if x0 >= w - 1 || y0 >= h - 1 {
        return None;
    }
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0)[0] as f32;
    let p10 = img.get_pixel(x0 + 1, y0)[0] as f32;
    let p01 = img.get_pixel(x0, y0 + 1)[0] as f32;
    let p11 = img.get_pixel(x0 + 1, y0 + 1)[0] as f32;

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bot = p01 * (1.0 - fx) + p11 * fx;
    Some((top * (1.0 - fy) + bot * fy) / 255.0)
}

/// Binarize an ROI: pixels satisfying `pred` become 255, everything else
/// (including pixels outside the ROI) becomes 0.
pub fn binarize(img: &GrayImage, roi: Roi, pred: impl Fn(u8) -> bool) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::new(w, h);
    for y in roi.y..(roi.y + roi.height).min(h) {
        for x in roi.x..(roi.x + roi.width).min(w) {
            if pred(img.get_pixel(x, y)[0]) {
                out.put_pixel(x, y, image::Luma([255]));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn centered_roi_clamps_to_image() {
        let img = GrayImage::new(100, 80);
        let roi = Roi::centered([5.0, 5.0], 20.0, 20.0, &img);
        assert_eq!((roi.x, roi.y), (0, 0));
        assert_eq!((roi.width, roi.height), (25, 25));
    }

    #[test]
    fn centered_roi_outside_image_is_empty() {
        let img = GrayImage::new(100, 80);
        let roi = Roi::centered([500.0, 500.0], 10.0, 10.0, &img);
        assert_eq!(roi.area(), 0);
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let mut img = GrayImage::new(2, 2);
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(1, 0, Luma([255]));
        img.put_pixel(0, 1, Luma([0]));
        img.put_pixel(1, 1, Luma([255]));
        let v = bilinear_sample(&img, 0.5, 0.5).unwrap();
        assert!((v - 0.5).abs() < 1e-3);
    }

    #[test]
    fn binarize_respects_roi() {
        let img = GrayImage::from_pixel(10, 10, Luma([200]));
        let roi = Roi {
            x: 2,
            y: 2,
            width: 3,
            height: 3,
        };
        let bin = binarize(&img, roi, |p| p > 100);
        assert_eq!(bin.get_pixel(3, 3)[0], 255);
        assert_eq!(bin.get_pixel(0, 0)[0], 0);
        assert_eq!(bin.get_pixel(9, 9)[0], 0);
    }
}
