//! Eye labels and the projected eyeball model.

use serde::{Deserialize, Serialize};

/// Which eye an image or measurement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eye {
    Left,
    Right,
}

impl std::fmt::Display for Eye {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Estimated projection of the eyeball onto the image plane.
///
/// Persists across frames: updated by calibration, or seeded from the first
/// accepted pupil detection when calibration has not run yet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePhysicalModel {
    /// Eyeball center in image pixels.
    pub center: [f64; 2],
    /// Projected eyeball radius in pixels.
    pub radius: f64,
}

impl EyePhysicalModel {
    /// Seed a model from a first pupil detection.
    ///
    /// The projected eyeball radius is taken as a fixed multiple of the pupil
    /// semi-major axis; calibration replaces this with a measured value.
    pub fn from_pupil(center: [f64; 2], pupil_semi_major: f64) -> Self {
        Self {
            center,
            radius: (pupil_semi_major * 4.0).max(1.0),
        }
    }

    /// Whether the model describes a usable, finite geometry.
    pub fn is_valid(&self) -> bool {
        self.radius > 0.0
            && self.radius.is_finite()
            && self.center[0].is_finite()
            && self.center[1].is_finite()
    }
}
