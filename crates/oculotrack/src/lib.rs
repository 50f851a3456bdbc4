//! oculotrack — per-frame binocular eye-tracking pipeline.
//!
//! Turns a raw grayscale eye image plus calibration state into a structured
//! eye-pose measurement. The pipeline stages are:
//!
//! 1. **Pupil** – dark-blob candidate search, moment-seeded ellipse,
//!    mask-aware sub-pixel refinement via robust conic fitting.
//! 2. **Eyelids** – column-wise edge scan, temporally filtered four-point
//!    polylines.
//! 3. **Reflections** – bright glints near the pupil with stable
//!    left-to-right identities.
//! 4. **Mask** – usable-pixel mask from bright-reflection exclusion and a
//!    parabola-bounded eyelid region.
//! 5. **Iris** – limbus radius from radial derivative profiles.
//! 6. **Torsion** – polar-unwrapped iris signature cross-correlated against
//!    a session reference.
//!
//! [`EyePipeline`] sequences the stages per frame and assembles an
//! [`EyeData`] record; cross-frame memory is explicit in [`PipelineState`].
//! Acquisition, frame pairing, and dual-camera synchronization live in the
//! companion `oculotrack-rig` crate.

pub mod blob;
pub mod ellipse;
pub mod eye;
pub mod eyelid;
pub mod frame;
pub mod imageops;
pub mod iris;
pub mod mask;
pub mod pipeline;
pub mod pupil;
pub mod reflections;
pub mod torsion;

#[cfg(test)]
mod test_utils;

use serde::{Deserialize, Serialize};

pub use ellipse::{Ellipse, FitError, RansacConfig};
pub use eye::{Eye, EyePhysicalModel};
pub use eyelid::{EyelidConfig, EyelidMethod, Eyelids};
pub use frame::{FrameOrientation, RawFrame};
pub use imageops::Roi;
pub use iris::{IrisConfig, IrisMeasurement};
pub use mask::MaskConfig;
pub use pipeline::{
    AlgorithmConfig, ConfigError, ContourConfig, EyePipeline, PipelineConfig, PipelineState,
    TrackingAlgorithm,
};
pub use pupil::{PupilConfig, PupilMethod};
pub use reflections::{CornealReflection, ReflectionConfig};
pub use torsion::{TorsionConfig, TorsionOutcome, TorsionReference};

/// Per-frame tracking outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackResult {
    /// All stages ran; fields are populated.
    Good,
    /// The usable ROI fell below the configured minimum size.
    RoiTooSmall,
    /// No pupil candidate survived (blink, off-axis, occlusion).
    MissingPupil,
}

impl TrackResult {
    /// Whether dependent fields (pupil, iris, torsion) carry measurements.
    pub fn is_good(self) -> bool {
        matches!(self, Self::Good)
    }
}

/// One eye's measurement record for one frame.
///
/// Created fresh per processed frame; downstream consumers (calibration,
/// recording, display) treat it as an immutable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EyeData {
    /// Which eye was imaged.
    pub eye: Eye,
    /// Camera frame number the record was computed from.
    pub frame_number: u64,
    /// Capture timestamp, seconds on the host monotonic clock.
    pub timestamp_secs: f64,
    /// Outcome code; non-`Good` records carry sentinel values below.
    pub result: TrackResult,
    /// Refined pupil ellipse, `None` when not found.
    pub pupil: Option<Ellipse>,
    /// Corneal reflections in stable left-to-right order.
    pub reflections: Vec<CornealReflection>,
    /// Temporally filtered eyelid polylines.
    pub eyelids: Option<Eyelids>,
    /// Iris boundary estimate.
    pub iris: Option<IrisMeasurement>,
    /// Ocular torsion in degrees versus the session reference, positive in
    /// the direction of increasing polar angle; 0.0 when unavailable.
    pub torsion_deg: f64,
    /// Data-quality score in [0, 1] from the torsion correlation margin.
    pub quality: f64,
    /// Unwrapped polar iris strip, present when debug output is enabled.
    #[serde(skip)]
    pub torsion_debug: Option<image::GrayImage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_result_good_flag() {
        assert!(TrackResult::Good.is_good());
        assert!(!TrackResult::MissingPupil.is_good());
        assert!(!TrackResult::RoiTooSmall.is_good());
    }

    #[test]
    fn eye_data_serializes_without_debug_image() {
        let record = EyeData {
            eye: Eye::Left,
            frame_number: 7,
            timestamp_secs: 0.07,
            result: TrackResult::Good,
            pupil: Some(Ellipse {
                cx: 50.0,
                cy: 40.0,
                a: 12.0,
                b: 11.0,
                angle: 0.1,
            }),
            reflections: vec![],
            eyelids: None,
            iris: Some(IrisMeasurement {
                radius_px: 30.0,
                quality: 0.8,
            }),
            torsion_deg: 1.5,
            quality: 0.8,
            torsion_debug: Some(image::GrayImage::new(4, 4)),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"frame_number\":7"));
        assert!(!json.contains("torsion_debug"));
    }
}
