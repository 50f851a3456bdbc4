//! oculotrack-rig — binocular acquisition plumbing for `oculotrack`.
//!
//! Feeds the per-eye pipelines synchronized image pairs from two cameras
//! with independent, drifting clocks:
//!
//! - [`FrameSource`] – the camera/video collaborator contract.
//! - [`CameraSync`] – per-camera frame-rate control loop
//!   (`Unknown`/`OnSync`/`Correcting`) plus the one-time [`initial_sync`]
//!   procedure.
//! - [`FramePairer`] – per-eye FIFOs pairing frames by number, tolerant of
//!   single-sided drops.
//! - [`BinocularRig`] – one grabber thread per camera, a bounded channel,
//!   and a consumer thread running both [`oculotrack::EyePipeline`]s.
//! - [`sim`] – deterministic simulated cameras for tests and examples.

pub mod error;
pub mod pairing;
pub mod rig;
pub mod sim;
pub mod source;
pub mod sync;

pub use error::RigError;
pub use pairing::{FramePair, FramePairer};
pub use rig::{BinocularRig, RigConfig, RigHandle, RigStats};
pub use source::FrameSource;
pub use sync::{initial_sync, CameraSync, SyncConfig, SyncMode};
