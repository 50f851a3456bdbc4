//! Per-eye pipeline orchestration.
//!
//! The pipeline owns the fixed stage order (ROI gate → pupil → eyelids →
//! reflections → mask → pupil refinement → iris → torsion) and the
//! short-circuit result codes; the algorithm modules own the math. Cross-
//! frame memory lives in an explicit [`PipelineState`] that is passed in and
//! returned each frame, so processing is a pure `(frame, state) → (record,
//! state)` step.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::ellipse::Ellipse;
use crate::eye::{Eye, EyePhysicalModel};
use crate::eyelid::{detect_eyelids, filter_eyelids, EyelidConfig, EyelidMethod, Eyelids};
use crate::frame::RawFrame;
use crate::imageops::Roi;
use crate::iris::{find_iris, IrisConfig, IrisMeasurement};
use crate::mask::{build_mask, MaskConfig};
use crate::pupil::{find_pupil, refine_pupil, PupilConfig};
use crate::reflections::{find_reflections, CornealReflection, ReflectionConfig};
use crate::torsion::{compute_torsion, TorsionConfig, TorsionOutcome, TorsionReference};
use crate::{EyeData, TrackResult};

/// Invalid pipeline configuration, raised at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
    #[error("millimeter-expressed thresholds require mm_per_px")]
    MissingScale,
}

/// Capability set every tracking algorithm variant implements.
///
/// The pipeline calls these in its fixed order; variants differ in how each
/// capability is realized, not in the orchestration around them.
pub trait TrackingAlgorithm: Send {
    fn find_pupil(
        &self,
        img: &GrayImage,
        roi: Roi,
        previous: Option<[f64; 2]>,
    ) -> Option<Ellipse>;

    /// Second, slower pupil pass against the masked image; part of the pupil
    /// capability, split out because it runs after mask construction.
    fn refine_pupil(
        &self,
        img: &GrayImage,
        mask: Option<&GrayImage>,
        rough: &Ellipse,
    ) -> Option<Ellipse>;

    fn find_eyelids(
        &self,
        img: &GrayImage,
        pupil: &Ellipse,
        eye: &EyePhysicalModel,
    ) -> Option<Eyelids>;

    fn find_reflections(&self, img: &GrayImage, pupil: &Ellipse) -> Vec<CornealReflection>;

    fn find_iris(
        &self,
        img: &GrayImage,
        mask: Option<&GrayImage>,
        pupil: &Ellipse,
        eye: &EyePhysicalModel,
        last_radius: Option<f64>,
    ) -> IrisMeasurement;

    fn compute_torsion(
        &self,
        img: &GrayImage,
        mask: Option<&GrayImage>,
        pupil: &Ellipse,
        iris: &IrisMeasurement,
        reference: Option<&TorsionReference>,
    ) -> TorsionOutcome;
}

/// Configuration of the contour-based algorithm variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContourConfig {
    pub pupil: PupilConfig,
    pub reflections: ReflectionConfig,
    pub eyelids: EyelidConfig,
    pub mask: MaskConfig,
    pub iris: IrisConfig,
    pub torsion: TorsionConfig,
}

/// Tagged algorithm selector; the variant is fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    /// Dark-blob pupil, edge-scan eyelids, radial-profile iris, correlation
    /// torsion.
    Contour(ContourConfig),
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self::Contour(ContourConfig::default())
    }
}

/// Pipeline-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Algorithm variant and its parameters.
    pub algorithm: AlgorithmConfig,
    /// Frames whose usable ROI holds fewer pixels than this are rejected.
    pub min_roi_px: u64,
    /// ROI half-extent as a multiple of the eye-model radius, once a model
    /// is known. Before that the full frame is searched.
    pub roi_radius_factor: f64,
    /// Image scale, millimeters per pixel; required when any mm-expressed
    /// threshold below is set.
    pub mm_per_px: Option<f64>,
    /// Minimum pupil radius in millimeters; overrides the pixel threshold.
    pub min_pupil_radius_mm: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmConfig::default(),
            min_roi_px: 64 * 64,
            roi_radius_factor: 1.2,
            mm_per_px: None,
            min_pupil_radius_mm: None,
        }
    }
}

/// Explicit cross-frame state for one eye.
///
/// Everything a frame's processing reads from the past is here; the pipeline
/// itself holds no mutable fields.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    /// Projected eyeball model; calibration-set or pupil-seeded.
    pub eye_model: Option<EyePhysicalModel>,
    /// Temporally filtered eyelid estimate.
    pub filtered_eyelids: Option<Eyelids>,
    /// Session torsion reference; replaced wholesale on reset.
    pub torsion_reference: Option<TorsionReference>,
    /// Last accepted pupil, used for candidate tie-breaks and ROI placement.
    pub last_pupil: Option<Ellipse>,
    /// Last accepted iris radius, the fallback when the limbus is occluded.
    pub last_iris_radius: Option<f64>,
}

impl PipelineState {
    /// Drop the torsion reference; the next usable frame captures a new one.
    pub fn reset_torsion_reference(&mut self) {
        self.torsion_reference = None;
    }

    /// Install a calibration-supplied eye model.
    pub fn set_eye_model(&mut self, model: EyePhysicalModel) {
        self.eye_model = Some(model);
    }
}

/// The contour algorithm: thin adapter binding the stage modules to one
/// config instance.
struct ContourTracker {
    config: ContourConfig,
}

impl TrackingAlgorithm for ContourTracker {
    fn find_pupil(
        &self,
        img: &GrayImage,
        roi: Roi,
        previous: Option<[f64; 2]>,
    ) -> Option<Ellipse> {
        find_pupil(img, roi, &self.config.pupil, previous)
    }

    fn refine_pupil(
        &self,
        img: &GrayImage,
        mask: Option<&GrayImage>,
        rough: &Ellipse,
    ) -> Option<Ellipse> {
        refine_pupil(img, mask, rough, &self.config.pupil)
    }

    fn find_eyelids(
        &self,
        img: &GrayImage,
        pupil: &Ellipse,
        eye: &EyePhysicalModel,
    ) -> Option<Eyelids> {
        detect_eyelids(img, pupil, eye, &self.config.eyelids)
    }

    fn find_reflections(&self, img: &GrayImage, pupil: &Ellipse) -> Vec<CornealReflection> {
        find_reflections(img, pupil, &self.config.reflections)
    }

    fn find_iris(
        &self,
        img: &GrayImage,
        mask: Option<&GrayImage>,
        pupil: &Ellipse,
        eye: &EyePhysicalModel,
        last_radius: Option<f64>,
    ) -> IrisMeasurement {
        find_iris(img, mask, pupil, eye, &self.config.iris, last_radius)
    }

    fn compute_torsion(
        &self,
        img: &GrayImage,
        mask: Option<&GrayImage>,
        pupil: &Ellipse,
        iris: &IrisMeasurement,
        reference: Option<&TorsionReference>,
    ) -> TorsionOutcome {
        compute_torsion(img, mask, pupil, iris, reference, &self.config.torsion)
    }
}

/// Per-eye processing pipeline.
pub struct EyePipeline {
    eye: Eye,
    config: PipelineConfig,
    tracker: Box<dyn TrackingAlgorithm>,
    eyelid_blend: f64,
    eyelids_enabled: bool,
    mask_config: MaskConfig,
}

impl EyePipeline {
    /// Build a pipeline, validating the configuration.
    pub fn new(eye: Eye, mut config: PipelineConfig) -> Result<Self, ConfigError> {
        if let Some(mm) = config.min_pupil_radius_mm {
            let scale = config.mm_per_px.ok_or(ConfigError::MissingScale)?;
            if scale <= 0.0 || !scale.is_finite() {
                return Err(ConfigError::InvalidValue {
                    field: "mm_per_px",
                    reason: format!("must be positive and finite, got {scale}"),
                });
            }
            let AlgorithmConfig::Contour(ref mut c) = config.algorithm;
            c.pupil.min_radius_px = mm / scale;
        }

        let AlgorithmConfig::Contour(ref c) = config.algorithm;
        validate_contour(c)?;

        let (eyelid_blend, eyelids_enabled) =
            (c.eyelids.blend, c.eyelids.method != EyelidMethod::None);
        let mask_config = c.mask.clone();
        let tracker = Box::new(ContourTracker { config: c.clone() });

        info!(%eye, "eye pipeline constructed");
        Ok(Self {
            eye,
            config,
            tracker,
            eyelid_blend,
            eyelids_enabled,
            mask_config,
        })
    }

    pub fn eye(&self) -> Eye {
        self.eye
    }

    /// Process one frame.
    ///
    /// Stage failures short-circuit into a degraded record with the matching
    /// result code; nothing here panics on routine tracking loss. Retry, if
    /// any, happens on the next frame.
    pub fn process(&self, frame: &RawFrame, mut state: PipelineState) -> (EyeData, PipelineState) {
        let img = &frame.image;

        let roi = match state.eye_model {
            Some(m) => {
                let half = m.radius * self.config.roi_radius_factor;
                Roi::centered(m.center, half, half, img)
            }
            None => Roi::full(img),
        };
        if roi.area() < self.config.min_roi_px {
            debug!(eye = %self.eye, frame = frame.frame_number, "ROI below minimum size");
            return (self.degraded(frame, TrackResult::RoiTooSmall), state);
        }

        let previous_center = state.last_pupil.map(|p| [p.cx, p.cy]);
        let Some(rough) = self.tracker.find_pupil(img, roi, previous_center) else {
            debug!(eye = %self.eye, frame = frame.frame_number, "no pupil");
            return (self.degraded(frame, TrackResult::MissingPupil), state);
        };

        let eye_model = *state
            .eye_model
            .get_or_insert_with(|| EyePhysicalModel::from_pupil([rough.cx, rough.cy], rough.a));

        let raw_eyelids = self.tracker.find_eyelids(img, &rough, &eye_model);
        let filtered = match (state.filtered_eyelids, raw_eyelids) {
            (Some(prev), Some(raw)) => Some(filter_eyelids(&prev, &raw, self.eyelid_blend)),
            (None, Some(raw)) => Some(raw),
            (prev, None) => prev,
        };
        state.filtered_eyelids = filtered;

        let reflections = self.tracker.find_reflections(img, &rough);

        let mask = build_mask(
            img,
            filtered.as_ref().filter(|_| self.eyelids_enabled),
            &eye_model,
            &self.mask_config,
        );

        let pupil = self
            .tracker
            .refine_pupil(img, Some(&mask), &rough)
            .unwrap_or(rough);
        state.last_pupil = Some(pupil);

        let iris = self
            .tracker
            .find_iris(img, Some(&mask), &pupil, &eye_model, state.last_iris_radius);
        if iris.quality > 0.0 {
            state.last_iris_radius = Some(iris.radius_px);
        }

        let torsion = self.tracker.compute_torsion(
            img,
            Some(&mask),
            &pupil,
            &iris,
            state.torsion_reference.as_ref(),
        );
        if let Some(reference) = torsion.new_reference {
            info!(eye = %self.eye, frame = frame.frame_number, "torsion reference captured");
            state.torsion_reference = Some(reference);
        }

        let record = EyeData {
            eye: self.eye,
            frame_number: frame.frame_number,
            timestamp_secs: frame.timestamp_secs,
            result: TrackResult::Good,
            pupil: Some(pupil),
            reflections,
            eyelids: filtered,
            iris: Some(iris),
            torsion_deg: torsion.angle_deg,
            quality: torsion.quality,
            torsion_debug: torsion.polar_debug,
        };
        (record, state)
    }

    fn degraded(&self, frame: &RawFrame, result: TrackResult) -> EyeData {
        EyeData {
            eye: self.eye,
            frame_number: frame.frame_number,
            timestamp_secs: frame.timestamp_secs,
            result,
            pupil: None,
            reflections: Vec::new(),
            eyelids: None,
            iris: None,
            torsion_deg: 0.0,
            quality: 0.0,
            torsion_debug: None,
        }
    }
}

fn validate_contour(c: &ContourConfig) -> Result<(), ConfigError> {
    fn check(ok: bool, field: &'static str, reason: String) -> Result<(), ConfigError> {
        if ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue { field, reason })
        }
    }

    check(
        c.pupil.min_radius_px >= 0.0 && c.pupil.min_radius_px.is_finite(),
        "pupil.min_radius_px",
        format!("must be non-negative, got {}", c.pupil.min_radius_px),
    )?;
    check(
        c.pupil.refine_rays >= 8,
        "pupil.refine_rays",
        format!("need at least 8 rays, got {}", c.pupil.refine_rays),
    )?;
    check(
        c.pupil.max_aspect_ratio >= 1.0,
        "pupil.max_aspect_ratio",
        format!("must be >= 1, got {}", c.pupil.max_aspect_ratio),
    )?;
    check(
        c.reflections.min_radius_px <= c.reflections.max_radius_px,
        "reflections.min_radius_px",
        "min exceeds max".into(),
    )?;
    check(
        c.eyelids.blend > 0.0 && c.eyelids.blend <= 1.0,
        "eyelids.blend",
        format!("must be in (0, 1], got {}", c.eyelids.blend),
    )?;
    check(
        c.torsion.angular_resolution_deg > 0.0 && 360.0 / c.torsion.angular_resolution_deg >= 8.0,
        "torsion.angular_resolution_deg",
        format!("must yield >= 8 bins, got {}", c.torsion.angular_resolution_deg),
    )?;
    check(
        c.torsion.interpolation_factor >= 1,
        "torsion.interpolation_factor",
        "must be >= 1".into(),
    )?;
    check(
        c.torsion.band_inner_frac >= 0.0
            && c.torsion.band_inner_frac < c.torsion.band_outer_frac
            && c.torsion.band_outer_frac <= 1.0,
        "torsion.band_inner_frac",
        "band fractions must satisfy 0 <= inner < outer <= 1".into(),
    )?;
    check(
        c.torsion.max_torsion_deg > 0.0 && c.torsion.max_torsion_deg < 180.0,
        "torsion.max_torsion_deg",
        format!("must be in (0, 180), got {}", c.torsion.max_torsion_deg),
    )?;
    Ok(())
}
