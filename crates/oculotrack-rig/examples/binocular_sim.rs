//! Drive the full binocular rig against simulated cameras.
//!
//! The right camera runs 0.5 % fast and drops every 25th frame; the rig
//! pairs what survives and prints one line per processed pair.
//!
//! ```sh
//! cargo run --example binocular_sim
//! ```

use std::time::Duration;

use oculotrack::{Eye, EyePipeline, PipelineConfig};
use oculotrack_rig::sim::{SimConfig, SimulatedCamera};
use oculotrack_rig::{BinocularRig, RigConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let left = Box::new(SimulatedCamera::new(SimConfig {
        render_eye: true,
        ..SimConfig::new(Eye::Left)
    }));
    let right = Box::new(SimulatedCamera::new(SimConfig {
        render_eye: true,
        clock_drift: 0.005,
        drop_every: Some(25),
        ..SimConfig::new(Eye::Right)
    }));

    let handle = BinocularRig::spawn(
        left,
        right,
        EyePipeline::new(Eye::Left, PipelineConfig::default())?,
        EyePipeline::new(Eye::Right, PipelineConfig::default())?,
        RigConfig::default(),
        |record| {
            if record.eye == Eye::Left {
                println!(
                    "frame {:>4} [{}]: {:?} torsion {:+.2} deg quality {:.2}",
                    record.frame_number, record.eye, record.result, record.torsion_deg,
                    record.quality,
                );
            }
        },
    )?;

    while handle.stats().frames_paired < 100 {
        std::thread::sleep(Duration::from_millis(2));
    }
    handle.stop();
    let stats = handle.join()?;
    println!(
        "paired {} frames, dropped {}, emitted {} records",
        stats.frames_paired, stats.frames_dropped, stats.records_emitted
    );
    Ok(())
}
