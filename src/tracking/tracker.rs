//! Tracker facade
//!
//! [`Tracker`] ties the session, codec, registry and polling engine
//! together behind the operations an application uses: open/close,
//! start/stop tracking, attach/detach tools, and per-cycle notifications.
//!
//! Control operations take `&mut self` and run on the caller's thread.
//! Queries take `&self` and may be issued from any thread while polling is
//! active; device commands from both sides are serialized by the codec lock.
//!
//! # Examples
//!
//! ```
//! use igt_tracker::io::simulator::SimulatedDevice;
//! use igt_tracker::tracking::registry::PortSpec;
//! use igt_tracker::tracking::tracker::Tracker;
//! use igt_tracker::TrackerConfig;
//!
//! let (device, control) = SimulatedDevice::new();
//! let mut tracker = Tracker::new(Box::new(device), TrackerConfig::default())?;
//!
//! tracker.open()?;
//! let handle = tracker.attach_tool("probe", PortSpec::wireless())?;
//! control.set_pose(handle, [1.0, 0.0, 0.0, 0.0, 10.0, 20.0, 30.0, 0.01]);
//!
//! let mut events = tracker.subscribe();
//! tracker.start_tracking()?;
//! let event = events.blocking_recv().unwrap();
//! assert_eq!(event.tool(), "probe");
//!
//! tracker.close()?;
//! # Ok::<(), igt_tracker::error::TrackerError>(())
//! ```

use std::sync::{Arc, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{interval_for, TrackerConfig};
use crate::error::{RegistryError, Result};
use crate::io::builder::transport_from_config;
use crate::io::session::{SessionObserver, TransportSession};
use crate::io::state_machine::State;
use crate::io::transport::Transport;
use crate::protocol::codec::CommandCodec;
use crate::protocol::command::{BaudRate, Handshake, VersionTarget};
use crate::tracking::events::{ChannelListener, TrackerEvent, TrackingListener};
use crate::tracking::polling::{PollingEngine, PollingStats, Shared};
use crate::tracking::registry::{
    validate_polling_frequency, HandleSource, PortHandle, PortSpec, RegistrySnapshot, ToolBinding,
};
use crate::tracking::sample::TransformSample;

/// User parameter holding the GPIO configuration
pub const GPIO_STATUS_PARAMETER: &str = "Param.GPIO.Configure.Value.4";

/// A tracking device session
pub struct Tracker {
    shared: Arc<Shared>,
    config: TrackerConfig,
    polling: Option<PollingEngine>,
    firmware: Option<String>,
}

impl Tracker {
    /// Create a closed tracker on top of a transport
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(transport: Box<dyn Transport>, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let mut session = TransportSession::with_parameters(transport, config.initial_parameters())?;
        session.set_capture_file(config.capture_file.clone())?;

        Ok(Self {
            shared: Arc::new(Shared::new(CommandCodec::new(session))),
            config,
            polling: None,
            firmware: None,
        })
    }

    /// Create a closed tracker on the transport the configuration names
    pub fn from_config(config: TrackerConfig) -> Result<Self> {
        let transport = transport_from_config(&config.transport)?;
        Self::new(transport, config)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Session state of the underlying channel
    pub fn session_state(&self) -> State {
        self.shared.codec().session().state()
    }

    pub fn is_open(&self) -> bool {
        self.shared.codec().session().is_open()
    }

    pub fn is_tracking(&self) -> bool {
        self.polling.is_some()
    }

    /// Firmware text reported during open/reset
    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    /// Open the channel and bring the device up
    ///
    /// Sequence: RESET, VER, COMM plus line reconfiguration on serial links,
    /// a settle pause, INIT. If any step fails the channel is closed again.
    pub fn open(&mut self) -> Result<()> {
        let mut codec = self.shared.codec();
        if let Err(err) = codec.session_mut().open() {
            // opened but not configured
            if codec.session().state() == State::PortOpen {
                if let Err(close_err) = codec.session_mut().close() {
                    debug!("close after failed configuration: {}", close_err);
                }
            }
            return Err(err);
        }

        match bring_up(&mut codec, &self.config) {
            Ok(firmware) => {
                info!("Tracker ready: {}", firmware.lines().next().unwrap_or_default());
                self.firmware = Some(firmware);
                Ok(())
            }
            Err(err) => {
                warn!("device bring-up failed: {}", err);
                if let Err(close_err) = codec.session_mut().close() {
                    debug!("close after failed bring-up: {}", close_err);
                }
                Err(err)
            }
        }
    }

    /// Stop tracking, release every tool and close the channel
    ///
    /// Closing an idle tracker does nothing.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        if let Err(err) = self.stop_tracking() {
            warn!("stop before close failed: {}", err);
        }

        let ports = self.shared.registry().ports();
        for (tool, _) in ports {
            if let Err(err) = self.detach_tool(&tool) {
                warn!(tool = %tool, "detach on close failed: {}", err);
            }
        }

        let mut codec = self.shared.codec();
        if self.config.is_serial() {
            // leave the device at its power-on rate
            if let Err(err) = codec.comm(BaudRate::B9600, Handshake::None) {
                warn!("could not restore 9600 baud: {}", err);
            }
            *codec.session_mut().parameters_mut() = self.config.initial_parameters();
        }
        codec.session_mut().close()?;
        drop(codec);

        self.shared.registry().clear();
        info!("Tracker closed");
        Ok(())
    }

    /// Reset and re-initialize the device
    ///
    /// Port handles do not survive a reset, so all tools are unbound.
    pub fn reset(&mut self) -> Result<()> {
        if self.is_tracking() {
            return Err(RegistryError::TrackingActive.into());
        }
        let mut codec = self.shared.codec();
        if !codec.session().is_open() {
            return Err(RegistryError::NotOpen.into());
        }

        codec.reset()?;
        self.shared.registry().clear();
        if self.config.is_serial() {
            *codec.session_mut().parameters_mut() = self.config.initial_parameters();
            codec.session_mut().update_parameters()?;
            negotiate_line(&mut codec, &self.config)?;
        }
        codec.init()?;
        let firmware = codec.version(VersionTarget::ControlFirmwareEnhanced)?;
        info!("Tracker reset: {}", firmware.lines().next().unwrap_or_default());
        self.firmware = Some(firmware);
        Ok(())
    }

    /// Enter tracking mode and start the polling thread
    pub fn start_tracking(&mut self) -> Result<()> {
        if self.is_tracking() {
            return Err(RegistryError::TrackingActive.into());
        }
        if !self.is_open() {
            return Err(RegistryError::NotOpen.into());
        }

        self.shared.codec().start_tracking()?;
        match PollingEngine::spawn(
            self.shared.clone(),
            self.config.poll_interval(),
            self.config.reply_options(),
        ) {
            Ok(engine) => {
                self.polling = Some(engine);
                Ok(())
            }
            Err(err) => {
                if let Err(stop_err) = self.shared.codec().stop_tracking() {
                    debug!("TSTOP after failed spawn: {}", stop_err);
                }
                Err(err)
            }
        }
    }

    /// Stop the polling thread and leave tracking mode; no-op when not tracking
    pub fn stop_tracking(&mut self) -> Result<()> {
        let Some(mut engine) = self.polling.take() else {
            return Ok(());
        };
        engine.stop();
        debug!(stats = ?engine.stats(), "polling finished");
        self.shared.codec().stop_tracking()
    }

    /// Change the polling frequency, live if tracking
    pub fn set_frequency(&mut self, hz: f64) -> Result<()> {
        let hz = validate_polling_frequency(hz)?;
        self.config.frequency_hz = hz;
        if let Some(engine) = &self.polling {
            engine.set_interval(interval_for(hz));
        }
        Ok(())
    }

    /// Bind a tool identifier to a port
    ///
    /// Fails without touching the device if the identifier is already bound
    /// or the tracker is not open. Requested handles are freed again if
    /// they cannot be initialized or enabled.
    pub fn attach_tool(&mut self, tool_id: &str, spec: PortSpec) -> Result<PortHandle> {
        let fixed = match spec.handle {
            HandleSource::Fixed(handle) => Some(handle),
            HandleSource::Request(_) => None,
        };
        self.shared.registry().check_available(tool_id, fixed)?;

        let mut codec = self.shared.codec();
        if !codec.session().is_open() {
            return Err(RegistryError::NotOpen.into());
        }

        let handle = match &spec.handle {
            HandleSource::Fixed(handle) => *handle,
            HandleSource::Request(selector) => codec.request_handle(selector)?,
        };

        // a handle bound to another tool is never freed here
        self.shared.registry().check_available(tool_id, Some(handle))?;

        let setup = codec
            .init_handle(handle)
            .and_then(|_| codec.enable_handle(handle, spec.priority));
        if let Err(err) = setup {
            if fixed.is_none() {
                if let Err(free_err) = codec.free_handle(handle) {
                    debug!("freeing handle {:02X}: {}", handle, free_err);
                }
            }
            return Err(err);
        }

        self.shared.registry().insert(tool_id, handle)?;
        info!(tool = tool_id, handle = %format!("{:02X}", handle), "Tool attached");
        Ok(handle)
    }

    /// Disable and free a tool's port, then unbind it
    ///
    /// Device failures are logged; the tool is removed regardless.
    pub fn detach_tool(&mut self, tool_id: &str) -> Result<()> {
        let handle = self
            .shared
            .registry()
            .binding(tool_id)
            .map(|binding| binding.handle)
            .ok_or_else(|| RegistryError::UnknownTool(tool_id.to_string()))?;

        {
            let mut codec = self.shared.codec();
            if codec.session().is_open() {
                if let Err(err) = codec.disable_handle(handle) {
                    warn!(tool = tool_id, "disabling port {:02X} failed: {}", handle, err);
                }
                if let Err(err) = codec.free_handle(handle) {
                    warn!(tool = tool_id, "freeing port {:02X} failed: {}", handle, err);
                }
            }
        }

        self.shared.registry().remove(tool_id)?;
        info!(tool = tool_id, "Tool detached");
        Ok(())
    }

    /// Register a listener for per-cycle notifications
    pub fn add_listener(&self, listener: Arc<dyn TrackingListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Receive per-cycle notifications on a channel
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TrackerEvent> {
        let (listener, receiver) = ChannelListener::new();
        self.add_listener(Arc::new(listener));
        receiver
    }

    /// Observe transport session events
    pub fn add_session_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.shared.codec().session_mut().add_observer(observer);
    }

    /// Latest sample stored for a tool
    pub fn transform(&self, tool_id: &str) -> Option<TransformSample> {
        self.shared
            .registry()
            .binding(tool_id)
            .and_then(|binding| binding.transform)
    }

    /// Everything stored for a tool
    pub fn tool(&self, tool_id: &str) -> Option<ToolBinding> {
        self.shared.registry().binding(tool_id).cloned()
    }

    /// Copy of every binding
    pub fn registry_snapshot(&self) -> RegistrySnapshot {
        self.shared.registry().snapshot()
    }

    pub fn polling_stats(&self) -> Option<PollingStats> {
        self.polling.as_ref().map(PollingEngine::stats)
    }

    /// Read a device user parameter
    pub fn get_parameter(&self, name: &str) -> Result<String> {
        self.shared.codec().get_parameter(name)
    }

    /// Query the GPIO configuration
    pub fn gpio_status(&self) -> Result<String> {
        self.get_parameter(GPIO_STATUS_PARAMETER)
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!("close on drop failed: {}", err);
        }
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("config", &self.config)
            .field("polling", &self.polling)
            .field("firmware", &self.firmware)
            .finish_non_exhaustive()
    }
}

/// RESET, VER, line negotiation, settle, INIT
fn bring_up(codec: &mut CommandCodec<Box<dyn Transport>>, config: &TrackerConfig) -> Result<String> {
    codec.reset()?;
    let firmware = codec.version(VersionTarget::ControlFirmwareEnhanced)?;
    if config.is_serial() {
        negotiate_line(codec, config)?;
    }
    codec.session_mut().sleep(config.settle_time())?;
    codec.init()?;
    Ok(firmware)
}

/// Switch device and host to the configured serial settings
fn negotiate_line(codec: &mut CommandCodec<Box<dyn Transport>>, config: &TrackerConfig) -> Result<()> {
    let target = config.operating_parameters();
    codec.comm(target.baud_rate, target.handshake)?;
    *codec.session_mut().parameters_mut() = target;
    codec.session_mut().update_parameters()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::error::{ProtocolError, TrackerError};
    use crate::io::simulator::{DeviceControl, SimulatedDevice};
    use std::path::PathBuf;
    use std::time::Duration;

    const POSE: [f64; 8] = [1.0, 0.0, 0.0, 0.0, 10.0, 20.0, 30.0, 0.02];

    fn tracker(config: TrackerConfig) -> (Tracker, DeviceControl) {
        let (device, control) = SimulatedDevice::new();
        (Tracker::new(Box::new(device), config).unwrap(), control)
    }

    fn serial_config() -> TrackerConfig {
        TrackerConfig {
            transport: TransportConfig::Serial {
                device: PathBuf::from("/dev/ttyUSB0"),
                baud_rate: BaudRate::B115200,
                handshake: Handshake::None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_open_socket_sequence() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        tracker.open().unwrap();

        assert!(tracker.is_open());
        assert_eq!(control.commands(), vec!["RESET:", "VER:4", "INIT:"]);
        assert_eq!(control.sleeps(), vec![Duration::from_secs(1)]);
        assert!(tracker.firmware_version().unwrap().contains("Simulated"));
    }

    #[test]
    fn test_open_serial_negotiates_rate() {
        let (mut tracker, control) = tracker(serial_config());
        tracker.open().unwrap();

        assert_eq!(
            control.commands(),
            vec!["RESET:", "VER:4", "COMM:50000", "INIT:"]
        );
        assert_eq!(control.device_baud(), BaudRate::B115200);
        assert_eq!(control.line_baud(), BaudRate::B115200);

        tracker.close().unwrap();
        assert_eq!(control.device_baud(), BaudRate::B9600);
        assert_eq!(session_baud(&tracker), BaudRate::B9600);
    }

    fn session_baud(tracker: &Tracker) -> BaudRate {
        tracker.shared.codec().session().parameters().baud_rate
    }

    #[test]
    fn test_failed_bring_up_closes() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        control.inject(crate::io::simulator::Fault::DeviceError(0x01));

        assert!(tracker.open().is_err());
        assert!(!tracker.is_open());
        assert_eq!(tracker.session_state(), State::Idle);
        assert!(!control.is_open());
    }

    #[test]
    fn test_failed_configuration_closes() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        control.fail_update(true);
        assert!(tracker.open().is_err());
        assert_eq!(tracker.session_state(), State::Idle);
        assert!(control.commands().is_empty());

        control.fail_update(false);
        tracker.open().unwrap();
        // a second open is rejected and leaves the session alone
        assert!(tracker.open().is_err());
        assert!(tracker.is_open());
    }

    #[test]
    fn test_attach_and_detach() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        tracker.open().unwrap();

        let handle = tracker.attach_tool("probe", PortSpec::wireless()).unwrap();
        assert!(control.is_enabled(handle));
        assert_eq!(tracker.tool("probe").unwrap().handle, handle);

        tracker.detach_tool("probe").unwrap();
        assert!(tracker.tool("probe").is_none());
        assert!(control.handles().is_empty());
    }

    #[test]
    fn test_duplicate_attach_skips_device() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        tracker.open().unwrap();
        tracker.attach_tool("probe", PortSpec::wireless()).unwrap();
        control.clear_commands();

        let err = tracker.attach_tool("probe", PortSpec::wireless()).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Registry(RegistryError::DuplicateTool(_))
        ));
        assert!(control.commands().is_empty());
    }

    #[test]
    fn test_attach_requires_open() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        let err = tracker.attach_tool("probe", PortSpec::fixed(0x01)).unwrap_err();
        assert!(matches!(err, TrackerError::Registry(RegistryError::NotOpen)));
        assert!(control.commands().is_empty());
    }

    #[test]
    fn test_attach_failure_frees_requested_handle() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        tracker.open().unwrap();

        control.fail_command("PINIT", 0x0F);
        let err = tracker.attach_tool("probe", PortSpec::wireless()).unwrap_err();
        assert_eq!(err.device_code(), Some(0x0F));
        assert_eq!(control.command_count("PHF"), 1);
        assert!(control.handles().is_empty());
        assert!(tracker.registry_snapshot().is_empty());
    }

    #[test]
    fn test_reissued_handle_is_not_freed() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        tracker.open().unwrap();
        let handle = tracker.attach_tool("probe", PortSpec::wireless()).unwrap();

        // the device hands the same handle out again
        control.unplug(handle);
        control.clear_commands();
        let err = tracker.attach_tool("pointer", PortSpec::wireless()).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Registry(RegistryError::HandleInUse { handle: 0x0A, .. })
        ));
        assert_eq!(control.commands(), vec!["PHRQ:*********1****"]);
        assert!(control.handles().contains(&handle));
        assert_eq!(tracker.tool("probe").unwrap().handle, handle);
        assert!(tracker.tool("pointer").is_none());
    }

    #[test]
    fn test_attach_fixed_port_error_leaves_registry() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        tracker.open().unwrap();

        let err = tracker.attach_tool("probe", PortSpec::fixed(0x01)).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Protocol(ProtocolError::Device { code: 0x2E })
        ));
        assert!(tracker.registry_snapshot().is_empty());
        assert_eq!(control.command_count("PHF"), 0);

        control.insert_port(0x01);
        assert_eq!(tracker.attach_tool("probe", PortSpec::fixed(0x01)).unwrap(), 0x01);
    }

    #[test]
    fn test_detach_unknown_tool() {
        let (mut tracker, _control) = tracker(TrackerConfig::default());
        tracker.open().unwrap();
        let before = tracker.registry_snapshot();
        let err = tracker.detach_tool("ghost").unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Registry(RegistryError::UnknownTool(_))
        ));
        assert_eq!(tracker.registry_snapshot(), before);
    }

    #[test]
    fn test_tracking_round_trip() {
        let (mut tracker, control) = tracker(TrackerConfig {
            frequency_hz: 200.0,
            ..Default::default()
        });
        tracker.open().unwrap();
        let handle = tracker.attach_tool("probe", PortSpec::wireless()).unwrap();
        control.set_pose(handle, POSE);

        let mut events = tracker.subscribe();
        tracker.start_tracking().unwrap();
        assert!(control.is_tracking());
        assert!(matches!(
            tracker.start_tracking(),
            Err(TrackerError::Registry(RegistryError::TrackingActive))
        ));

        let event = events.blocking_recv().unwrap();
        match event {
            TrackerEvent::ToolVisible { tool, sample } => {
                assert_eq!(tool, "probe");
                assert_eq!(sample.translation, [10.0, 20.0, 30.0]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(tracker.transform("probe").is_some());

        tracker.stop_tracking().unwrap();
        assert!(!control.is_tracking());
        assert!(tracker.polling_stats().is_none());
    }

    #[test]
    fn test_reset_rejected_while_tracking() {
        let (mut tracker, _control) = tracker(TrackerConfig::default());
        assert!(matches!(
            tracker.reset(),
            Err(TrackerError::Registry(RegistryError::NotOpen))
        ));
        tracker.open().unwrap();
        tracker.start_tracking().unwrap();
        assert!(matches!(
            tracker.reset(),
            Err(TrackerError::Registry(RegistryError::TrackingActive))
        ));
        tracker.stop_tracking().unwrap();
    }

    #[test]
    fn test_reset_unbinds_tools() {
        let (mut tracker, control) = tracker(serial_config());
        tracker.open().unwrap();
        tracker.attach_tool("probe", PortSpec::wireless()).unwrap();
        control.clear_commands();

        tracker.reset().unwrap();
        assert_eq!(
            control.commands(),
            vec!["RESET:", "COMM:50000", "INIT:", "VER:4"]
        );
        assert!(tracker.registry_snapshot().is_empty());
        assert_eq!(control.line_baud(), BaudRate::B115200);
    }

    #[test]
    fn test_close_releases_everything() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        tracker.open().unwrap();
        tracker.attach_tool("probe", PortSpec::wireless()).unwrap();
        tracker.attach_tool("pointer", PortSpec::wireless()).unwrap();
        tracker.start_tracking().unwrap();

        tracker.close().unwrap();
        assert_eq!(tracker.session_state(), State::Idle);
        assert!(tracker.registry_snapshot().is_empty());
        assert!(!tracker.is_tracking());
        assert!(control.handles().is_empty());
        assert!(!control.is_open());

        // closing again is harmless
        tracker.close().unwrap();
    }

    #[test]
    fn test_set_frequency() {
        let (mut tracker, _control) = tracker(TrackerConfig::default());
        assert!(tracker.set_frequency(-1.0).is_err());
        assert_eq!(tracker.config().frequency_hz, 60.0);
        tracker.set_frequency(0.0).unwrap();
        assert_eq!(tracker.config().poll_interval(), Duration::ZERO);
    }

    #[test]
    fn test_parameters() {
        let (mut tracker, control) = tracker(TrackerConfig::default());
        tracker.open().unwrap();
        control.set_parameter(GPIO_STATUS_PARAMETER, "3");
        assert_eq!(tracker.gpio_status().unwrap(), "3");
        assert_eq!(tracker.get_parameter("Device.Type").unwrap(), "0");
        assert!(tracker.get_parameter("No.Such").is_err());
    }
}
