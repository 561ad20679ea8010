//! Tool tracking
//!
//! Sample decoding, the tool registry, the polling engine and the
//! [`Tracker`] facade that ties them to a device session.

pub mod events;
pub mod polling;
pub mod registry;
pub mod sample;
pub mod tracker;

pub use events::{ChannelListener, TrackerEvent, TrackingListener};
pub use polling::{CycleReport, PollingStats};
pub use registry::{PortHandle, PortSpec, ToolBinding, ToolRegistry};
pub use sample::{Quaternion, TransformSample};
pub use tracker::Tracker;
