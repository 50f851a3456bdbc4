//! Structural rig errors.
//!
//! Routine tracking loss never surfaces here; it stays result codes on
//! [`oculotrack::EyeData`]. These errors stop the acquisition loop and are
//! surfaced to the caller responsible for restarting it.

use oculotrack::Eye;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RigError {
    /// A camera stream violated the strict frame-number monotonicity
    /// invariant.
    #[error("{eye} camera delivered frame {got} after frame {prev}")]
    NonMonotonicFrame { eye: Eye, prev: u64, got: u64 },

    /// Initial synchronization did not converge within the bounded attempt
    /// count.
    #[error("initial sync failed after {attempts} attempts (residual delay {residual_secs:.6} s)")]
    SyncFailed {
        attempts: usize,
        residual_secs: f64,
    },

    /// A camera stopped delivering frames while the rig was running.
    #[error("{eye} camera stopped delivering frames")]
    SourceStalled { eye: Eye },

    /// The frame channel closed while the consumer still expected frames.
    #[error("frame channel disconnected")]
    ChannelDisconnected,

    /// Camera-reported failure.
    #[error("{eye} camera: {message}")]
    Source { eye: Eye, message: String },
}
