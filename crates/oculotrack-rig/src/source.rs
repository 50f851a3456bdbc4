//! The camera/video collaborator contract.

use oculotrack::{FrameOrientation, RawFrame};

use crate::error::RigError;

/// A single camera or video source for one eye.
///
/// The rig owns one source per eye on a dedicated grabber thread; vendor
/// register programming lives behind implementations of this trait, never in
/// the rig.
pub trait FrameSource: Send {
    /// Begin delivering frames.
    fn start(&mut self) -> Result<(), RigError>;

    /// Stop delivering frames. Idempotent.
    fn stop(&mut self);

    /// Block until the next frame, a stop request, or a bounded internal
    /// timeout. `Ok(None)` means "no frame right now, poll again" so the
    /// grabber loop can observe cancellation promptly.
    fn grab_frame(&mut self) -> Result<Option<RawFrame>, RigError>;

    /// Currently commanded frame rate, Hz.
    fn frame_rate(&self) -> f64;

    /// Sensor frame dimensions, (width, height).
    fn frame_size(&self) -> (u32, u32);

    /// Mounting orientation; the grabber corrects frames with it.
    fn orientation(&self) -> FrameOrientation;

    /// Command a new frame rate; returns the rate the hardware actually
    /// accepted.
    fn set_frame_rate(&mut self, hz: f64) -> f64;
}
