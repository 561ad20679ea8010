//! Tool tracking against the simulated device
//!
//! Attaches two tools, moves one of them around a circle from a background
//! thread and prints the notifications the tracker delivers.
//!
//! ```bash
//! cargo run --example simulated_tracking
//!
//! # Show every command and reply
//! RUST_LOG=igt_tracker=trace cargo run --example simulated_tracking
//! ```

use igt_tracker::io::simulator::SimulatedDevice;
use igt_tracker::io::TrackerBuilder;
use igt_tracker::tracking::{PortSpec, TrackerEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_ids(true)
        .init();

    let (device, control) = SimulatedDevice::new();
    let mut tracker = TrackerBuilder::new()
        .transport(Box::new(device))
        .frequency(20.0)
        .build()?;

    tracker.open()?;
    info!(firmware = ?tracker.firmware_version(), "Device opened");

    let probe = tracker.attach_tool("probe", PortSpec::wireless())?;
    let reference = tracker.attach_tool("reference", PortSpec::wireless())?;
    control.set_pose(reference, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, -1500.0, 0.1]);

    let running = Arc::new(AtomicBool::new(true));
    let mover = {
        let running = running.clone();
        let control = control.clone();
        thread::spawn(move || {
            let mut angle: f64 = 0.0;
            while running.load(Ordering::Relaxed) {
                if (angle as i64) % 7 == 6 {
                    control.set_missing(probe);
                } else {
                    let (x, y) = (100.0 * angle.cos(), 100.0 * angle.sin());
                    let (half_s, half_c) = ((angle / 2.0).sin(), (angle / 2.0).cos());
                    control.set_pose(probe, [half_c, 0.0, 0.0, half_s, x, y, -1200.0, 0.25]);
                }
                angle += 0.2;
                thread::sleep(Duration::from_millis(30));
            }
        })
    };

    let mut events = tracker.subscribe();
    tracker.start_tracking()?;

    let deadline = tokio::time::sleep(Duration::from_secs(3));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(TrackerEvent::ToolVisible { tool, sample }) => {
                    let [x, y, z] = sample.translation;
                    println!("{:>10}  ({:8.2}, {:8.2}, {:8.2})  rms {:.3}", tool, x, y, z, sample.error_estimate);
                }
                Some(TrackerEvent::ToolNotAvailable { tool }) => println!("{:>10}  not available", tool),
                None => break,
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = mover.join();

    if let Some(stats) = tracker.polling_stats() {
        info!(cycles = stats.cycles, failed = stats.failed_cycles, "Polling statistics");
    }
    tracker.close()?;
    Ok(())
}
