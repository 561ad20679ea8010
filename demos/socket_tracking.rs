//! Tool tracking over TCP
//!
//! Connects to a network-attached tracker, attaches the tools given on the
//! command line and prints their poses for ten seconds.
//!
//! ```bash
//! cargo run --example socket_tracking -- 192.168.1.20 8765 probe pointer
//! ```

use igt_tracker::error::Result;
use igt_tracker::io::TrackerBuilder;
use igt_tracker::tracking::PortSpec;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let service = args.next().unwrap_or_else(|| "8765".to_string());
    let mut tools: Vec<String> = args.collect();
    if tools.is_empty() {
        tools.push("probe".to_string());
    }

    let mut tracker = TrackerBuilder::new()
        .tcp(host.as_str(), service.as_str())
        .frequency(30.0)
        .build()?;
    tracker.open()?;
    println!("[INFO] Connected to {}:{}", host, service);

    for tool in &tools {
        let handle = tracker.attach_tool(tool, PortSpec::wireless())?;
        println!("[INFO] {} on port {:02X}", tool, handle);
    }

    match tracker.gpio_status() {
        Ok(value) => println!("[INFO] GPIO configuration: {}", value),
        Err(e) => println!("[WARN] GPIO query failed: {}", e),
    }

    tracker.start_tracking()?;
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(10) {
        for tool in &tools {
            match tracker.transform(tool) {
                Some(sample) if !sample.is_stale(Instant::now()) => {
                    println!("{:>10}  {:?}", tool, sample.translation)
                }
                _ => println!("{:>10}  -", tool),
            }
        }
        thread::sleep(Duration::from_millis(500));
    }

    tracker.close()
}
