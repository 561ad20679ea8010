//! Concurrency tests
//!
//! Queries issued from several threads while the polling thread runs must
//! each receive the reply to their own command.

use igt_tracker::io::simulator::SimulatedDevice;
use igt_tracker::tracking::{PortSpec, Tracker};
use igt_tracker::TrackerConfig;
use std::sync::Arc;
use std::thread;

#[test]
fn test_parallel_parameter_queries_while_tracking() {
    let (device, control) = SimulatedDevice::new();
    for i in 0..4 {
        control.set_parameter(&format!("Param.Test.{}", i), &format!("value-{}", i));
    }
    let config = TrackerConfig {
        frequency_hz: 0.0,
        settle_time_ms: 0,
        ..Default::default()
    };
    let mut tracker = Tracker::new(Box::new(device), config).unwrap();
    tracker.open().unwrap();
    let handle = tracker.attach_tool("probe", PortSpec::wireless()).unwrap();
    control.set_pose(handle, [1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.1]);
    tracker.start_tracking().unwrap();

    let tracker = Arc::new(tracker);
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let tracker = tracker.clone();
            thread::spawn(move || {
                let name = format!("Param.Test.{}", i);
                for _ in 0..25 {
                    assert_eq!(tracker.get_parameter(&name).unwrap(), format!("value-{}", i));
                    assert!(tracker.transform("probe").map_or(true, |s| s.translation == [1.0, 2.0, 3.0]));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = tracker.polling_stats().unwrap();
    assert!(stats.cycles > 0);
    assert_eq!(stats.failed_cycles, 0);

    let mut tracker = Arc::try_unwrap(tracker).unwrap();
    tracker.close().unwrap();
}

#[test]
fn test_snapshot_reads_do_not_block_polling() {
    let (device, control) = SimulatedDevice::new();
    let config = TrackerConfig {
        frequency_hz: 500.0,
        settle_time_ms: 0,
        ..Default::default()
    };
    let mut tracker = Tracker::new(Box::new(device), config).unwrap();
    tracker.open().unwrap();
    let handle = tracker.attach_tool("probe", PortSpec::wireless()).unwrap();
    control.set_pose(handle, [1.0, 0.0, 0.0, 0.0, 5.0, 5.0, 5.0, 0.1]);
    tracker.start_tracking().unwrap();

    let tracker = Arc::new(tracker);
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let tracker = tracker.clone();
            thread::spawn(move || {
                let mut seen = 0;
                while seen < 50 {
                    if tracker.registry_snapshot()["probe"].transform.is_some() {
                        seen += 1;
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }

    let mut tracker = Arc::try_unwrap(tracker).unwrap();
    tracker.stop_tracking().unwrap();
    assert!(control.command_count("TX") > 0);
}
