//! Frame pairing across the two eye streams.
//!
//! Each eye has a FIFO of frames awaiting a same-numbered partner. A pair is
//! emitted only when both heads agree; a head that is provably unmatched
//! (the other stream has already moved past its number) is discarded and
//! counted, so a single-sided drop can never desynchronize the streams
//! permanently.

use std::collections::VecDeque;

use oculotrack::{Eye, RawFrame};
use tracing::warn;

use crate::error::RigError;

/// A left/right frame pair with a common frame number.
#[derive(Debug)]
pub struct FramePair {
    pub left: RawFrame,
    pub right: RawFrame,
}

impl FramePair {
    pub fn frame_number(&self) -> u64 {
        self.left.frame_number
    }
}

/// Per-eye pairing queues.
#[derive(Debug)]
pub struct FramePairer {
    left: VecDeque<RawFrame>,
    right: VecDeque<RawFrame>,
    /// Last frame number pushed per eye, for the monotonicity invariant.
    last_pushed: [Option<u64>; 2],
    soft_cap: usize,
    drops: u64,
}

impl FramePairer {
    /// `soft_cap` bounds each queue; the oldest unmatched frame is evicted
    /// (and counted as a drop) beyond it.
    pub fn new(soft_cap: usize) -> Self {
        Self {
            left: VecDeque::new(),
            right: VecDeque::new(),
            last_pushed: [None, None],
            soft_cap: soft_cap.max(1),
            drops: 0,
        }
    }

    /// Frames discarded so far (single-sided drops + soft-cap evictions).
    pub fn drops(&self) -> u64 {
        self.drops
    }

    /// Frames currently waiting for a partner.
    pub fn pending(&self) -> usize {
        self.left.len() + self.right.len()
    }

    /// Enqueue one frame and emit every pair that becomes complete.
    ///
    /// Frame numbers must be strictly monotonic per eye; a violation is a
    /// structural error that stops the rig.
    pub fn push(&mut self, frame: RawFrame) -> Result<Vec<FramePair>, RigError> {
        let slot = match frame.eye {
            Eye::Left => 0,
            Eye::Right => 1,
        };
        if let Some(prev) = self.last_pushed[slot] {
            if frame.frame_number <= prev {
                return Err(RigError::NonMonotonicFrame {
                    eye: frame.eye,
                    prev,
                    got: frame.frame_number,
                });
            }
        }
        self.last_pushed[slot] = Some(frame.frame_number);
        let queue = match frame.eye {
            Eye::Left => &mut self.left,
            Eye::Right => &mut self.right,
        };
        queue.push_back(frame);

        if queue.len() > self.soft_cap {
            let evicted = queue.pop_front();
            if let Some(f) = evicted {
                warn!(
                    eye = %f.eye,
                    frame = f.frame_number,
                    "pairing queue over soft cap, evicting oldest frame"
                );
                self.drops += 1;
            }
        }

        let mut pairs = Vec::new();
        loop {
            let (Some(l), Some(r)) = (self.left.front(), self.right.front()) else {
                break;
            };
            let (ln, rn) = (l.frame_number, r.frame_number);
            if ln == rn {
                pairs.push(FramePair {
                    left: self.left.pop_front().unwrap(),
                    right: self.right.pop_front().unwrap(),
                });
            } else if ln < rn {
                // Right already moved past `ln`: the right frame was dropped
                // at the source, so the left sibling is unmatched for good.
                let f = self.left.pop_front().unwrap();
                warn!(frame = f.frame_number, "discarding unmatched left frame");
                self.drops += 1;
            } else {
                let f = self.right.pop_front().unwrap();
                warn!(frame = f.frame_number, "discarding unmatched right frame");
                self.drops += 1;
            }
        }
        Ok(pairs)
    }
}
