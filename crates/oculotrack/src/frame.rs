//! Raw frames as delivered by a camera or video source.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::eye::Eye;

/// Sensor mounting orientation, corrected once at acquisition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrientation {
    #[default]
    Upright,
    MirroredHorizontal,
    MirroredVertical,
    Rotated180,
}

impl FrameOrientation {
    /// Apply the orientation correction to an image.
    ///
    /// `Upright` is a no-op and returns the input unchanged.
    pub fn correct(self, img: GrayImage) -> GrayImage {
        match self {
            Self::Upright => img,
            Self::MirroredHorizontal => image::imageops::flip_horizontal(&img),
            Self::MirroredVertical => image::imageops::flip_vertical(&img),
            Self::Rotated180 => image::imageops::rotate180(&img),
        }
    }
}

/// One 8-bit grayscale frame with its capture metadata.
///
/// A frame is owned exclusively by the stage currently processing it and is
/// moved down the pipeline, never shared mutably.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Grayscale pixel data, orientation-corrected.
    pub image: GrayImage,
    /// Capture time in seconds on the host monotonic clock.
    pub timestamp_secs: f64,
    /// Raw sensor timestamp counter, unit defined by the source.
    pub timestamp_raw: u64,
    /// Strictly monotonic frame number within one camera's stream.
    pub frame_number: u64,
    /// Which eye this frame images.
    pub eye: Eye,
}

impl RawFrame {
    /// Frame dimensions as (width, height).
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn marker_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(4, 3, Luma([0]));
        img.put_pixel(0, 0, Luma([255]));
        img
    }

    #[test]
    fn upright_is_identity() {
        let img = marker_image();
        let out = FrameOrientation::Upright.correct(img.clone());
        assert_eq!(out, img);
    }

    #[test]
    fn mirror_moves_marker() {
        let out = FrameOrientation::MirroredHorizontal.correct(marker_image());
        assert_eq!(out.get_pixel(3, 0)[0], 255);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn rotate180_moves_marker_to_opposite_corner() {
        let out = FrameOrientation::Rotated180.correct(marker_image());
        assert_eq!(out.get_pixel(3, 2)[0], 255);
    }
}
