//! Simulated cameras for tests and examples.
//!
//! A [`SimulatedCamera`] models a free-running sensor with its own skewed
//! clock: it honors `set_frame_rate` like real hardware but delivers frames
//! at `commanded × (1 + clock_drift)`, which is exactly the situation the
//! synchronizer exists to correct. It can drop frames on a schedule and
//! render synthetic eye scenes so the full pipeline has something to track.

use image::{GrayImage, Luma};
use oculotrack::{Eye, FrameOrientation, RawFrame};

use crate::error::RigError;
use crate::source::FrameSource;

/// Simulated camera parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub eye: Eye,
    /// Initially commanded frame rate, Hz.
    pub frame_rate_hz: f64,
    /// Fractional clock skew: actual rate = commanded × (1 + drift).
    pub clock_drift: f64,
    /// Timestamp of the first frame, seconds.
    pub start_offset_secs: f64,
    /// Drop every Nth frame number (the counter still advances).
    pub drop_every: Option<u64>,
    /// Stop delivering after this many frames; `None` runs forever.
    pub total_frames: Option<u64>,
    pub frame_size: (u32, u32),
    /// Render a synthetic eye scene instead of flat gray frames.
    pub render_eye: bool,
}

impl SimConfig {
    pub fn new(eye: Eye) -> Self {
        Self {
            eye,
            frame_rate_hz: 100.0,
            clock_drift: 0.0,
            start_offset_secs: 0.0,
            drop_every: None,
            total_frames: None,
            frame_size: (160, 120),
            render_eye: false,
        }
    }
}

/// Deterministic in-process frame source.
pub struct SimulatedCamera {
    config: SimConfig,
    commanded_hz: f64,
    clock: f64,
    frame_number: u64,
    delivered: u64,
    running: bool,
}

impl SimulatedCamera {
    pub fn new(config: SimConfig) -> Self {
        let commanded_hz = config.frame_rate_hz;
        let clock = config.start_offset_secs;
        Self {
            config,
            commanded_hz,
            clock,
            frame_number: 0,
            delivered: 0,
            running: false,
        }
    }

    fn render(&self) -> GrayImage {
        let (w, h) = self.config.frame_size;
        if !self.config.render_eye {
            return GrayImage::from_pixel(w, h, Luma([128]));
        }
        let center = [w as f64 / 2.0, h as f64 / 2.0];
        let pupil_r = (w.min(h) as f64) * 0.1;
        let iris_r = pupil_r * 2.7;
        let mut img = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let dx = x as f64 - center[0];
                let dy = y as f64 - center[1];
                let d = (dx * dx + dy * dy).sqrt();
                let pix = if d <= pupil_r {
                    20
                } else if d <= iris_r {
                    let t = dy.atan2(dx);
                    (130.0
                        + 22.0 * (3.0 * t).sin()
                        + 18.0 * (7.0 * t + 1.3).sin()
                        + 12.0 * (13.0 * t + 2.1).sin()) as u8
                } else {
                    200
                };
                img.put_pixel(x, y, Luma([pix]));
            }
        }
        img
    }
}

impl FrameSource for SimulatedCamera {
    fn start(&mut self) -> Result<(), RigError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn grab_frame(&mut self) -> Result<Option<RawFrame>, RigError> {
        loop {
            if !self.running {
                return Ok(None);
            }
            if let Some(total) = self.config.total_frames {
                if self.delivered >= total {
                    return Ok(None);
                }
            }

            let actual_hz = self.commanded_hz * (1.0 + self.config.clock_drift);
            self.clock += 1.0 / actual_hz;
            self.frame_number += 1;

            if let Some(n) = self.config.drop_every {
                if n > 0 && self.frame_number % n == 0 {
                    continue;
                }
            }

            self.delivered += 1;
            return Ok(Some(RawFrame {
                image: self.render(),
                timestamp_secs: self.clock,
                timestamp_raw: (self.clock * 1e7) as u64,
                frame_number: self.frame_number,
                eye: self.config.eye,
            }));
        }
    }

    fn frame_rate(&self) -> f64 {
        self.commanded_hz
    }

    fn frame_size(&self) -> (u32, u32) {
        self.config.frame_size
    }

    fn orientation(&self) -> FrameOrientation {
        FrameOrientation::Upright
    }

    fn set_frame_rate(&mut self, hz: f64) -> f64 {
        self.commanded_hz = hz.max(1.0);
        self.commanded_hz
    }
}
