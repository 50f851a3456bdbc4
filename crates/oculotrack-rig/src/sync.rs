//! Dual-camera frame-rate synchronization.
//!
//! Each camera runs an independent control loop that measures how far frame
//! arrivals have drifted from a common time reference and nudges the
//! commanded frame rate to steer the drift back toward zero. A separate
//! one-time initial-sync procedure establishes the common reference and
//! brings both cameras inside a tight tolerance before steady-state
//! tracking starts.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RigError;
use crate::source::FrameSource;

/// Synchronization state of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// No reference established or judged yet.
    Unknown,
    /// Delay inside the allowed threshold at the target rate.
    OnSync,
    /// Running a corrected rate, waiting for the delay to cross back.
    Correcting,
}

/// Synchronizer configuration, shared by both cameras.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Common target frame rate, Hz.
    pub target_rate_hz: f64,
    /// Delay threshold as a fraction of the sampling period.
    pub delay_fraction: f64,
    /// Frames that must elapse after a rate change before another one is
    /// allowed (anti-oscillation guard).
    pub min_frames_between_changes: u64,
    /// Proportional gain `k` in `target / (1 − k·delay)`.
    pub gain: f64,
    /// Correction rates are clamped to target ± this offset, Hz.
    pub max_rate_offset_hz: f64,
    /// Initial-sync tolerance as a fraction of the sampling period; tighter
    /// than `delay_fraction`.
    pub initial_tolerance_fraction: f64,
    /// Frames grabbed per camera to flush stale buffers before the common
    /// reference is picked.
    pub drain_frames: usize,
    /// Bound on initial-sync iterations before giving up.
    pub max_initial_attempts: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_rate_hz: 100.0,
            delay_fraction: 0.25,
            min_frames_between_changes: 10,
            gain: 4.0,
            max_rate_offset_hz: 1.0,
            initial_tolerance_fraction: 0.1,
            drain_frames: 4,
            max_initial_attempts: 300,
        }
    }
}

impl SyncConfig {
    fn period(&self) -> f64 {
        1.0 / self.target_rate_hz
    }

    fn threshold(&self) -> f64 {
        self.delay_fraction * self.period()
    }

    /// Correction rate for a measured delay, clamped around the target.
    fn corrected_rate(&self, delay: f64) -> f64 {
        let denom = 1.0 - self.gain * delay;
        // A delay so large the denominator flips sign still means "as fast
        // as allowed", not a negative rate.
        let raw = if denom <= f64::EPSILON {
            f64::INFINITY
        } else {
            self.target_rate_hz / denom
        };
        raw.clamp(
            self.target_rate_hz - self.max_rate_offset_hz,
            self.target_rate_hz + self.max_rate_offset_hz,
        )
    }
}

/// Per-camera synchronization state machine.
#[derive(Debug, Clone)]
pub struct CameraSync {
    config: SyncConfig,
    mode: SyncMode,
    reference_time: f64,
    reference_frame: u64,
    has_reference: bool,
    last_delay: f64,
    frames_since_change: u64,
    /// Sign of the delay when the current correction started.
    correction_sign: f64,
}

impl CameraSync {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            mode: SyncMode::Unknown,
            reference_time: 0.0,
            reference_frame: 0,
            has_reference: false,
            last_delay: 0.0,
            frames_since_change: 0,
            correction_sign: 0.0,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Delay measured on the most recent frame, seconds.
    pub fn last_delay(&self) -> f64 {
        self.last_delay
    }

    /// Install the common time reference (an explicit sync event).
    pub fn set_reference(&mut self, time_secs: f64, frame_number: u64) {
        self.reference_time = time_secs;
        self.reference_frame = frame_number;
        self.has_reference = true;
        self.mode = SyncMode::Unknown;
        self.frames_since_change = 0;
    }

    /// Forget everything; the next frame becomes the reference.
    pub fn reset(&mut self) {
        self.has_reference = false;
        self.mode = SyncMode::Unknown;
        self.last_delay = 0.0;
        self.frames_since_change = 0;
    }

    /// Account one delivered frame.
    ///
    /// Returns a frame rate to command on the camera, or `None` to leave the
    /// rate alone.
    pub fn on_frame(&mut self, frame_number: u64, arrival_secs: f64) -> Option<f64> {
        if !self.has_reference {
            self.set_reference(arrival_secs, frame_number);
            return None;
        }

        let expected =
            (frame_number.wrapping_sub(self.reference_frame)) as f64 * self.config.period();
        let delay = (arrival_secs - self.reference_time) - expected;
        self.last_delay = delay;
        self.frames_since_change += 1;
        let threshold = self.config.threshold();

        match self.mode {
            SyncMode::Unknown | SyncMode::OnSync => {
                if delay.abs() > threshold
                    && self.frames_since_change >= self.config.min_frames_between_changes
                {
                    let rate = self.config.corrected_rate(delay);
                    debug!(
                        delay_ms = delay * 1e3,
                        rate_hz = rate,
                        "delay over threshold, correcting frame rate"
                    );
                    self.mode = SyncMode::Correcting;
                    self.correction_sign = delay.signum();
                    self.frames_since_change = 0;
                    Some(rate)
                } else {
                    if self.mode == SyncMode::Unknown && delay.abs() <= threshold {
                        self.mode = SyncMode::OnSync;
                    }
                    None
                }
            }
            SyncMode::Correcting => {
                // Overshoot past zero, or back inside the threshold: restore
                // the literal target rate.
                if delay.signum() != self.correction_sign || delay.abs() <= threshold {
                    debug!(delay_ms = delay * 1e3, "correction complete, restoring target rate");
                    self.mode = SyncMode::OnSync;
                    self.frames_since_change = 0;
                    Some(self.config.target_rate_hz)
                } else {
                    None
                }
            }
        }
    }
}

/// One-time initial synchronization of two cameras.
///
/// Drains a few buffered frames from each source, picks the later of the two
/// current timestamps as the common time reference, then iterates the
/// steady-state correction with the tighter initial tolerance until both
/// cameras are inside it, for at most `max_initial_attempts` frames per
/// camera. Both cameras are left commanded at the exact target rate.
pub fn initial_sync(
    left: &mut dyn FrameSource,
    right: &mut dyn FrameSource,
    config: &SyncConfig,
) -> Result<(CameraSync, CameraSync), RigError> {
    let last_left = drain(left, oculotrack::Eye::Left, config.drain_frames)?;
    let last_right = drain(right, oculotrack::Eye::Right, config.drain_frames)?;

    // The later camera defines "now"; the earlier one is already behind it.
    let reference_time = last_left.0.max(last_right.0);
    let mut sync_left = CameraSync::new(config.clone());
    let mut sync_right = CameraSync::new(config.clone());
    sync_left.set_reference(reference_time, last_left.1);
    sync_right.set_reference(reference_time, last_right.1);
    info!(reference_time, "initial sync reference established");

    let tolerance = config.initial_tolerance_fraction * config.period();
    for attempt in 0..config.max_initial_attempts {
        step(left, oculotrack::Eye::Left, &mut sync_left)?;
        step(right, oculotrack::Eye::Right, &mut sync_right)?;

        if sync_left.last_delay().abs() <= tolerance && sync_right.last_delay().abs() <= tolerance
        {
            left.set_frame_rate(config.target_rate_hz);
            right.set_frame_rate(config.target_rate_hz);
            info!(attempts = attempt + 1, "initial sync converged");
            return Ok((sync_left, sync_right));
        }
    }

    let residual = sync_left
        .last_delay()
        .abs()
        .max(sync_right.last_delay().abs());
    Err(RigError::SyncFailed {
        attempts: config.max_initial_attempts,
        residual_secs: residual,
    })
}

/// Empty-grab polls tolerated before a source counts as stalled.
const MAX_EMPTY_GRABS: usize = 1000;

/// Grab frames until `count` have been seen, returning the last
/// (timestamp, frame number).
fn drain(
    source: &mut dyn FrameSource,
    eye: oculotrack::Eye,
    count: usize,
) -> Result<(f64, u64), RigError> {
    let mut last = None;
    let mut grabbed = 0usize;
    let mut empty = 0usize;
    while grabbed < count.max(1) {
        match source.grab_frame()? {
            Some(frame) => {
                last = Some((frame.timestamp_secs, frame.frame_number));
                grabbed += 1;
            }
            None => {
                if let Some(l) = last {
                    return Ok(l);
                }
                empty += 1;
                if empty > MAX_EMPTY_GRABS {
                    return Err(RigError::SourceStalled { eye });
                }
            }
        }
    }
    last.ok_or(RigError::SourceStalled { eye })
}

/// Grab one frame, feed the synchronizer, and apply any rate command.
fn step(
    source: &mut dyn FrameSource,
    eye: oculotrack::Eye,
    sync: &mut CameraSync,
) -> Result<(f64, u64), RigError> {
    for _ in 0..MAX_EMPTY_GRABS {
        if let Some(frame) = source.grab_frame()? {
            if let Some(rate) = sync.on_frame(frame.frame_number, frame.timestamp_secs) {
                source.set_frame_rate(rate);
            }
            return Ok((frame.timestamp_secs, frame.frame_number));
        }
    }
    Err(RigError::SourceStalled { eye })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pure-math simulated clock: commanded rate vs. actual delivery rate
    /// skewed by a drift factor.
    struct DriftClock {
        commanded_hz: f64,
        drift: f64,
        time: f64,
        frame: u64,
    }

    impl DriftClock {
        fn new(start_hz: f64, drift: f64) -> Self {
            Self {
                commanded_hz: start_hz,
                drift,
                time: 0.0,
                frame: 0,
            }
        }

        fn tick(&mut self) -> (u64, f64) {
            let actual = self.commanded_hz * (1.0 + self.drift);
            self.time += 1.0 / actual;
            self.frame += 1;
            (self.frame, self.time)
        }
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            target_rate_hz: 100.0,
            ..Default::default()
        }
    }

    #[test]
    fn zero_drift_stays_on_sync_at_target_rate() {
        let config = test_config();
        let mut sync = CameraSync::new(config.clone());
        let mut clock = DriftClock::new(100.0, 0.0);
        for _ in 0..500 {
            let (n, t) = clock.tick();
            assert_eq!(sync.on_frame(n, t), None, "no rate change expected");
        }
        assert_eq!(sync.mode(), SyncMode::OnSync);
        assert!(sync.last_delay().abs() < 1e-9);
    }

    #[test]
    fn one_percent_drift_converges_and_stays_bounded() {
        let config = test_config();
        let mut sync = CameraSync::new(config.clone());
        let mut clock = DriftClock::new(100.0, 0.01);

        let mut corrected_at = None;
        let mut resynced_at = None;
        for i in 0..10_000u64 {
            let (n, t) = clock.tick();
            if let Some(rate) = sync.on_frame(n, t) {
                clock.commanded_hz = rate;
                match sync.mode() {
                    SyncMode::Correcting => corrected_at.get_or_insert(i),
                    _ => resynced_at.get_or_insert(i),
                };
            }
        }
        let corrected_at = corrected_at.expect("drift must trigger a correction");
        let resynced_at = resynced_at.expect("correction must complete");
        assert!(resynced_at > corrected_at);

        // Steady state: delay bounded well inside the sampling period.
        let half_period = 0.5 / config.target_rate_hz;
        let mut on_sync_seen = false;
        for _ in 0..10_000u64 {
            let (n, t) = clock.tick();
            if let Some(rate) = sync.on_frame(n, t) {
                clock.commanded_hz = rate;
            }
            assert!(
                sync.last_delay().abs() < half_period,
                "delay {} exceeded half period",
                sync.last_delay()
            );
            on_sync_seen |= sync.mode() == SyncMode::OnSync;
        }
        assert!(on_sync_seen, "synchronizer never returned to OnSync");
    }

    #[test]
    fn correction_restores_literal_target_rate() {
        let config = test_config();
        let mut sync = CameraSync::new(config.clone());
        let mut clock = DriftClock::new(100.0, 0.01);
        let mut commands = Vec::new();
        for _ in 0..10_000u64 {
            let (n, t) = clock.tick();
            if let Some(rate) = sync.on_frame(n, t) {
                clock.commanded_hz = rate;
                commands.push((sync.mode(), rate));
            }
        }
        assert!(commands.len() >= 2);
        let (mode, rate) = commands[1];
        assert_eq!(mode, SyncMode::OnSync);
        assert_eq!(rate, config.target_rate_hz);
        // The first command slowed the too-fast camera down.
        assert!(commands[0].1 < config.target_rate_hz);
    }

    #[test]
    fn rate_commands_respect_clamp() {
        let config = test_config();
        // Enormous delay still clamps to ±1 Hz.
        assert_eq!(config.corrected_rate(10.0), 101.0);
        assert_eq!(config.corrected_rate(-10.0), 99.0);
    }

    #[test]
    fn reset_returns_to_unknown() {
        let mut sync = CameraSync::new(test_config());
        sync.on_frame(1, 0.01);
        sync.on_frame(2, 0.02);
        assert_ne!(sync.mode(), SyncMode::Unknown);
        sync.reset();
        assert_eq!(sync.mode(), SyncMode::Unknown);
    }

    #[test]
    fn anti_oscillation_guard_delays_first_correction() {
        let config = SyncConfig {
            min_frames_between_changes: 50,
            ..test_config()
        };
        let mut sync = CameraSync::new(config);
        let mut clock = DriftClock::new(100.0, 0.02);
        let mut first_command = None;
        for i in 0..200u64 {
            let (n, t) = clock.tick();
            if sync.on_frame(n, t).is_some() {
                first_command = Some(i);
                break;
            }
        }
        // Frame 0 sets the reference; the guard counts from there.
        assert!(first_command.expect("command expected") >= 50);
    }
}
