//! Optical Position Tracker Driver in Rust
//!
//! This library drives position-sensor tracking devices that speak the
//! ASCII command protocol (`NAME:ARGS` + CRC-16 + carriage return) over a
//! serial port or a TCP socket, and reports the pose of attached tools.
//!
//! # Features
//!
//! - **Supervised I/O** - Every open, close, read and write runs through an explicit transition table
//! - **Serial and TCP links** - 8N1 serial ports and host/service TCP sockets
//! - **Command codec** - CRC-checked commands and replies with device error decoding
//! - **Background polling** - A polling thread queries transforms at a configurable rate
//! - **Thread-safe queries** - Poses and parameters can be read from any thread while tracking
//! - **Traffic capture** - Every command and reply can be recorded to a replayable log
//! - **Simulated device** - Full protocol simulator for tests and demos
//!
//! # Quick Start
//!
//! ```no_run
//! use igt_tracker::io::TrackerBuilder;
//! use igt_tracker::tracking::{PortSpec, TrackerEvent};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), igt_tracker::TrackerError> {
//! let mut tracker = TrackerBuilder::new()
//!     .serial("/dev/ttyUSB0")
//!     .frequency(60.0)
//!     .build()?;
//!
//! tracker.open()?;
//! tracker.attach_tool("probe", PortSpec::wireless())?;
//!
//! let mut events = tracker.subscribe();
//! tracker.start_tracking()?;
//!
//! while let Some(event) = events.recv().await {
//!     if let TrackerEvent::ToolVisible { tool, sample } = event {
//!         println!("{}: {:?}", tool, sample.translation);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **`io`** - Device channels
//!   - `state_machine` - Session states, inputs and the transition table
//!   - `session` - `TransportSession`, the supervised channel
//!   - `serial` / `socket` / `simulator` - Concrete transports
//!   - `capture` - Traffic recording
//!   - `builder` - Type-state `TrackerBuilder`
//!
//! - **`protocol`** - Device command set
//!   - `command` / `reply` - Command encoding and reply parsing
//!   - `tx` - Tracking reply decoding
//!   - `codec` - One command/reply exchange with error register handling
//!
//! - **`tracking`** - Tool tracking
//!   - `registry` - Tool identifier to port handle bindings
//!   - `polling` - Background polling engine
//!   - `tracker` - The `Tracker` facade
//!
//! - **`config`** / **`error`** - Settings and the unified error type

pub mod config;
pub mod error;
pub mod io;
pub mod protocol;
pub mod tracking;

// Re-export commonly used types
pub use config::{TrackerConfig, TransportConfig};
pub use error::{Result, TrackerError};
pub use tracking::Tracker;
