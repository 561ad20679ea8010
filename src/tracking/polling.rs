//! Background polling engine
//!
//! One thread per tracking session. Each cycle sends a single TX query for
//! all ports, classifies every registered tool, stores the results under
//! the registry lock and then notifies listeners with no lock held.
//!
//! Precedence when evaluating a tool:
//!
//! 1. port status lacks in-port/initialized/enabled: unavailable, nothing
//!    is stored except the status bits and no listener is called
//! 2. decode status is not valid: absent, `tool_not_available` fires
//! 3. otherwise the pose is decoded, stored and `tool_visible` fires
//!
//! The stop flag is checked once per cycle, so stopping waits for at most
//! one in-flight query.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::io::transport::Transport;
use crate::protocol::codec::CommandCodec;
use crate::protocol::command::ReplyOptions;
use crate::protocol::tx::{HandleStatus, PortStatus, RawTransform};
use crate::tracking::events::TrackingListener;
use crate::tracking::registry::{CycleUpdate, ToolRegistry};
use crate::tracking::sample::{decode_transform, TransformSample};

/// Added to the cycle interval to form a sample's validity bound
pub const VALIDITY_MARGIN: Duration = Duration::from_millis(10);

/// Shortest pause between cycles
pub const MIN_PAUSE: Duration = Duration::from_millis(1);

/// State shared between the control thread and the polling thread
pub(crate) struct Shared {
    pub(crate) codec: Mutex<CommandCodec<Box<dyn Transport>>>,
    pub(crate) registry: Mutex<ToolRegistry>,
    pub(crate) listeners: RwLock<Vec<Arc<dyn TrackingListener>>>,
}

impl Shared {
    pub(crate) fn new(codec: CommandCodec<Box<dyn Transport>>) -> Self {
        Self {
            codec: Mutex::new(codec),
            registry: Mutex::new(ToolRegistry::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn codec(&self) -> MutexGuard<'_, CommandCodec<Box<dyn Transport>>> {
        self.codec.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, ToolRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn listeners(&self) -> Vec<Arc<dyn TrackingListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Counters kept by the polling thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollingStats {
    /// Completed cycles
    pub cycles: u64,
    /// Cycles skipped because the query failed
    pub failed_cycles: u64,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

/// Result of evaluating one tool in one cycle
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Evaluation {
    Unavailable,
    Absent,
    Visible(TransformSample),
}

/// Tool counts for one completed cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub visible: usize,
    pub absent: usize,
    pub unavailable: usize,
}

/// Handle to the running polling thread
pub struct PollingEngine {
    stop: Arc<AtomicBool>,
    interval_nanos: Arc<AtomicU64>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl PollingEngine {
    /// Start polling
    pub(crate) fn spawn(shared: Arc<Shared>, interval: Duration, options: ReplyOptions) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let interval_nanos = Arc::new(AtomicU64::new(duration_nanos(interval)));
        let counters = Arc::new(Counters::default());

        let handle = {
            let stop = stop.clone();
            let interval_nanos = interval_nanos.clone();
            let counters = counters.clone();
            thread::Builder::new()
                .name("tracker-poll".to_string())
                .spawn(move || run(&shared, &stop, &interval_nanos, &counters, options))?
        };

        info!(interval_ms = interval.as_secs_f64() * 1000.0, "Polling started");
        Ok(Self {
            stop,
            interval_nanos,
            counters,
            handle: Some(handle),
        })
    }

    /// Change the cycle interval; takes effect from the next cycle
    pub fn set_interval(&self, interval: Duration) {
        self.interval_nanos
            .store(duration_nanos(interval), Ordering::Relaxed);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> PollingStats {
        PollingStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            failed_cycles: self.counters.failed_cycles.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Request a stop and wait for the thread to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("polling thread panicked");
            }
            info!("Polling stopped");
        }
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PollingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEngine")
            .field("interval", &self.interval())
            .field("stats", &self.stats())
            .finish()
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn run(
    shared: &Shared,
    stop: &AtomicBool,
    interval_nanos: &AtomicU64,
    counters: &Counters,
    options: ReplyOptions,
) {
    while !stop.load(Ordering::Acquire) {
        let started = Instant::now();
        let interval = Duration::from_nanos(interval_nanos.load(Ordering::Relaxed));

        match poll_cycle(shared, options, interval) {
            Ok(report) => {
                counters.cycles.fetch_add(1, Ordering::Relaxed);
                trace!(?report, "cycle complete");
            }
            Err(err) => {
                counters.failed_cycles.fetch_add(1, Ordering::Relaxed);
                warn!("polling cycle skipped: {}", err);
            }
        }

        let pause = interval.saturating_sub(started.elapsed()).max(MIN_PAUSE);
        let deadline = Instant::now() + pause;
        loop {
            if stop.load(Ordering::Acquire) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
    }
}

/// Classify one tool from its port status and decode status
pub(crate) fn evaluate(
    status: PortStatus,
    decode: HandleStatus,
    raw: Option<&RawTransform>,
    valid_until: Instant,
) -> Evaluation {
    if !status.is_available() {
        return Evaluation::Unavailable;
    }
    match (decode, raw) {
        (HandleStatus::Valid, Some(raw)) => Evaluation::Visible(decode_transform(raw, valid_until).sample),
        _ => Evaluation::Absent,
    }
}

/// Run a single polling cycle
pub(crate) fn poll_cycle(shared: &Shared, options: ReplyOptions, interval: Duration) -> Result<CycleReport> {
    let reply = shared.codec().query_transforms(options)?;

    let ports = shared.registry().ports();
    let valid_until = Instant::now() + interval + VALIDITY_MARGIN;

    let mut results = Vec::with_capacity(ports.len());
    for (tool, handle) in ports {
        let status = reply.port_status(handle);
        let (decode, raw) = reply.transform(handle);
        let evaluation = evaluate(status, decode, raw.as_ref(), valid_until);
        let update = CycleUpdate {
            status,
            absent: decode != HandleStatus::Valid,
            transform: match &evaluation {
                Evaluation::Visible(sample) => Some(*sample),
                _ => None,
            },
        };
        results.push((tool, update, evaluation));
    }

    {
        let mut registry = shared.registry();
        for (tool, update, _) in &results {
            // detached since the copy was taken
            if !registry.apply(tool, update.clone()) {
                trace!(tool = %tool, "tool left during cycle");
            }
        }
    }

    let listeners = shared.listeners();
    let mut report = CycleReport::default();
    for (tool, _, evaluation) in &results {
        match evaluation {
            Evaluation::Unavailable => {
                report.unavailable += 1;
                debug!(tool = %tool, "tool is not available");
            }
            Evaluation::Absent => {
                report.absent += 1;
                debug!(tool = %tool, "tool is not in view");
                for listener in &listeners {
                    listener.tool_not_available(tool);
                }
            }
            Evaluation::Visible(sample) => {
                report.visible += 1;
                for listener in &listeners {
                    listener.tool_visible(tool, sample);
                }
            }
        }
    }
    Ok(report)
}
