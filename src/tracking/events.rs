//! Per-cycle notifications
//!
//! Listeners are called from the polling thread, outside every lock, once
//! per tool per cycle. Use [`ChannelListener`] to receive the same events on
//! a tokio channel instead.

use tokio::sync::mpsc;
use tracing::debug;

use crate::tracking::sample::TransformSample;

/// A tracking notification
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// The tool was seen and a new sample stored
    ToolVisible {
        tool: String,
        sample: TransformSample,
    },
    /// The tool is tracked but the device reported it out of view
    ToolNotAvailable { tool: String },
}

impl TrackerEvent {
    /// Tool identifier the event refers to
    pub fn tool(&self) -> &str {
        match self {
            TrackerEvent::ToolVisible { tool, .. } | TrackerEvent::ToolNotAvailable { tool } => tool,
        }
    }
}

/// Receives per-cycle tracking notifications
pub trait TrackingListener: Send + Sync {
    fn tool_visible(&self, tool: &str, sample: &TransformSample);

    fn tool_not_available(&self, tool: &str);
}

/// Forwards events into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<TrackerEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel
    ///
    /// # Examples
    ///
    /// ```
    /// use igt_tracker::tracking::events::{ChannelListener, TrackerEvent, TrackingListener};
    ///
    /// let (listener, mut events) = ChannelListener::new();
    /// listener.tool_not_available("probe");
    /// assert_eq!(
    ///     events.try_recv().unwrap(),
    ///     TrackerEvent::ToolNotAvailable { tool: "probe".to_string() }
    /// );
    /// ```
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: TrackerEvent) {
        if self.sender.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

impl TrackingListener for ChannelListener {
    fn tool_visible(&self, tool: &str, sample: &TransformSample) {
        self.send(TrackerEvent::ToolVisible {
            tool: tool.to_string(),
            sample: *sample,
        });
    }

    fn tool_not_available(&self, tool: &str) {
        self.send(TrackerEvent::ToolNotAvailable {
            tool: tool.to_string(),
        });
    }
}
