//! The binocular acquisition rig.
//!
//! One grabber thread per camera feeds a single bounded channel; a consumer
//! thread pairs frames by number and runs both eye pipelines, emitting
//! `EyeData` records through a callback. All pipeline state is owned by the
//! consumer; the channel is the only structure shared across threads. One
//! cooperative stop flag cancels everything.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use oculotrack::{Eye, EyeData, EyePipeline, PipelineState, RawFrame};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RigError;
use crate::pairing::FramePairer;
use crate::source::FrameSource;
use crate::sync::{initial_sync, CameraSync, SyncConfig};

/// Rig configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    /// Bounded frame-channel depth; producers block when it is full.
    pub channel_capacity: usize,
    /// Pairing-queue soft cap per eye.
    pub pairing_soft_cap: usize,
    /// Run the one-time initial sync before starting the grabber threads.
    pub run_initial_sync: bool,
    /// Frame-rate synchronizer settings.
    pub sync: SyncConfig,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 8,
            pairing_soft_cap: 64,
            run_initial_sync: true,
            sync: SyncConfig::default(),
        }
    }
}

/// Counters exposed while the rig runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RigStats {
    /// Pairs handed to the pipelines.
    pub frames_paired: u64,
    /// Frames discarded by pairing (single-sided drops + evictions).
    pub frames_dropped: u64,
    /// EyeData records emitted.
    pub records_emitted: u64,
}

#[derive(Default)]
struct SharedStats {
    paired: AtomicU64,
    dropped: AtomicU64,
    records: AtomicU64,
}

impl SharedStats {
    fn snapshot(&self) -> RigStats {
        RigStats {
            frames_paired: self.paired.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            records_emitted: self.records.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running rig.
pub struct RigHandle {
    stop: Arc<AtomicBool>,
    reset_requests: [Arc<AtomicBool>; 2],
    stats: Arc<SharedStats>,
    grabbers: Vec<JoinHandle<Result<(), RigError>>>,
    consumer: Option<JoinHandle<Result<(), RigError>>>,
}

impl RigHandle {
    /// Request a cooperative stop of all rig threads.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Ask the consumer to drop one eye's torsion reference before its next
    /// frame; the swap happens on the thread that owns the state.
    pub fn request_torsion_reference_reset(&self, eye: Eye) {
        self.reset_requests[eye_index(eye)].store(true, Ordering::SeqCst);
    }

    /// Current counters.
    pub fn stats(&self) -> RigStats {
        self.stats.snapshot()
    }

    /// Stop, join all threads, and surface the first structural error.
    pub fn join(mut self) -> Result<RigStats, RigError> {
        self.stop();
        let mut first_error = None;
        for handle in self.grabbers.drain(..) {
            match handle.join() {
                Ok(Err(e)) if first_error.is_none() => first_error = Some(e),
                Ok(_) => {}
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        if let Some(handle) = self.consumer.take() {
            match handle.join() {
                Ok(Err(e)) if first_error.is_none() => first_error = Some(e),
                Ok(_) => {}
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(self.stats.snapshot()),
        }
    }
}

/// Build and start the binocular rig.
pub struct BinocularRig;

impl BinocularRig {
    /// Start both cameras (running initial sync when configured), spawn the
    /// grabber and consumer threads, and return the control handle.
    ///
    /// `on_record` receives one immutable [`EyeData`] snapshot per eye per
    /// paired frame, on the consumer thread.
    pub fn spawn<F>(
        mut left_source: Box<dyn FrameSource>,
        mut right_source: Box<dyn FrameSource>,
        left_pipeline: EyePipeline,
        right_pipeline: EyePipeline,
        config: RigConfig,
        on_record: F,
    ) -> Result<RigHandle, RigError>
    where
        F: FnMut(EyeData) + Send + 'static,
    {
        left_source.start()?;
        right_source.start()?;

        let (sync_left, sync_right) = if config.run_initial_sync {
            initial_sync(left_source.as_mut(), right_source.as_mut(), &config.sync)?
        } else {
            (
                CameraSync::new(config.sync.clone()),
                CameraSync::new(config.sync.clone()),
            )
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SharedStats::default());
        let reset_requests = [
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        ];
        let (tx, rx) = sync_channel::<RawFrame>(config.channel_capacity.max(1));

        let grabbers = vec![
            spawn_grabber(Eye::Left, left_source, sync_left, tx.clone(), stop.clone()),
            spawn_grabber(Eye::Right, right_source, sync_right, tx, stop.clone()),
        ];

        let consumer = spawn_consumer(
            rx,
            left_pipeline,
            right_pipeline,
            config,
            stop.clone(),
            [reset_requests[0].clone(), reset_requests[1].clone()],
            stats.clone(),
            on_record,
        );

        info!("binocular rig started");
        Ok(RigHandle {
            stop,
            reset_requests,
            stats,
            grabbers,
            consumer: Some(consumer),
        })
    }
}

fn eye_index(eye: Eye) -> usize {
    match eye {
        Eye::Left => 0,
        Eye::Right => 1,
    }
}

fn spawn_grabber(
    eye: Eye,
    mut source: Box<dyn FrameSource>,
    mut sync: CameraSync,
    tx: SyncSender<RawFrame>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<Result<(), RigError>> {
    std::thread::Builder::new()
        .name(format!("grab-{eye}"))
        .spawn(move || {
            let orientation = source.orientation();
            let result = loop {
                if stop.load(Ordering::SeqCst) {
                    break Ok(());
                }
                match source.grab_frame() {
                    Ok(Some(mut frame)) => {
                        frame.image = orientation.correct(frame.image);
                        if let Some(rate) = sync.on_frame(frame.frame_number, frame.timestamp_secs)
                        {
                            let actual = source.set_frame_rate(rate);
                            tracing::debug!(%eye, rate, actual, "frame rate adjusted");
                        }
                        // A full channel blocks here: backpressure, not loss.
                        if frame.eye != eye {
                            warn!(%eye, frame_eye = %frame.eye, "source delivered mislabeled frame");
                        }
                        if tx.send(frame).is_err() {
                            break Ok(());
                        }
                    }
                    Ok(None) => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => {
                        stop.store(true, Ordering::SeqCst);
                        break Err(e);
                    }
                }
            };
            source.stop();
            info!(%eye, "grabber thread exiting");
            result
        })
        .expect("spawn grabber thread")
}

#[allow(clippy::too_many_arguments)]
fn spawn_consumer<F>(
    rx: Receiver<RawFrame>,
    left_pipeline: EyePipeline,
    right_pipeline: EyePipeline,
    config: RigConfig,
    stop: Arc<AtomicBool>,
    reset_requests: [Arc<AtomicBool>; 2],
    stats: Arc<SharedStats>,
    mut on_record: F,
) -> JoinHandle<Result<(), RigError>>
where
    F: FnMut(EyeData) + Send + 'static,
{
    std::thread::Builder::new()
        .name("frame-consumer".into())
        .spawn(move || {
            let mut pairer = FramePairer::new(config.pairing_soft_cap);
            let mut left_state = PipelineState::default();
            let mut right_state = PipelineState::default();

            loop {
                let frame = match rx.recv() {
                    Ok(frame) => frame,
                    // All senders gone: clean on cooperative stop, a
                    // structural failure otherwise.
                    Err(_) => {
                        return if stop.load(Ordering::SeqCst) {
                            Ok(())
                        } else {
                            Err(RigError::ChannelDisconnected)
                        };
                    }
                };

                let pairs = match pairer.push(frame) {
                    Ok(pairs) => pairs,
                    Err(e) => {
                        stop.store(true, Ordering::SeqCst);
                        return Err(e);
                    }
                };
                stats.dropped.store(pairer.drops(), Ordering::Relaxed);

                for pair in pairs {
                    if reset_requests[0].swap(false, Ordering::SeqCst) {
                        left_state.reset_torsion_reference();
                    }
                    if reset_requests[1].swap(false, Ordering::SeqCst) {
                        right_state.reset_torsion_reference();
                    }

                    let (record, next) =
                        left_pipeline.process(&pair.left, std::mem::take(&mut left_state));
                    left_state = next;
                    on_record(record);

                    let (record, next) =
                        right_pipeline.process(&pair.right, std::mem::take(&mut right_state));
                    right_state = next;
                    on_record(record);

                    stats.paired.fetch_add(1, Ordering::Relaxed);
                    stats.records.fetch_add(2, Ordering::Relaxed);
                }

                if stop.load(Ordering::SeqCst) {
                    return Ok(());
                }
            }
        })
        .expect("spawn consumer thread")
}
