//! Tool registry
//!
//! Binds application tool identifiers to device port handles. Everything
//! known about a tool (handle, last port status, absent flag, last sample)
//! lives in one [`ToolBinding`], so a tool is always added or removed as a
//! whole. The registry itself is not synchronized; the tracker keeps it
//! behind a mutex and only holds that lock while copying or storing.

use std::collections::BTreeMap;

use crate::error::RegistryError;
use crate::protocol::command::{TrackingPriority, DEFAULT_HANDLE_SELECTOR};
use crate::protocol::tx::PortStatus;
use crate::tracking::sample::TransformSample;

/// Device-assigned port handle
pub type PortHandle = u16;

/// How a tool obtains its port handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleSource {
    /// A handle the device already knows (wired tool in a fixed port)
    Fixed(PortHandle),
    /// Ask the device for a new handle with this PHRQ selector
    Request(String),
}

/// Port description passed to `attach_tool`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub handle: HandleSource,
    pub priority: TrackingPriority,
}

impl PortSpec {
    /// Use an existing handle with dynamic priority
    pub fn fixed(handle: PortHandle) -> Self {
        Self {
            handle: HandleSource::Fixed(handle),
            priority: TrackingPriority::Dynamic,
        }
    }

    /// Request a wireless tool handle with dynamic priority
    pub fn wireless() -> Self {
        Self::request(DEFAULT_HANDLE_SELECTOR)
    }

    /// Request a handle with a custom selector
    pub fn request(selector: impl Into<String>) -> Self {
        Self {
            handle: HandleSource::Request(selector.into()),
            priority: TrackingPriority::Dynamic,
        }
    }

    pub fn with_priority(mut self, priority: TrackingPriority) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for PortSpec {
    fn default() -> Self {
        Self::wireless()
    }
}

/// Everything tracked for one tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolBinding {
    pub tool_id: String,
    pub handle: PortHandle,
    /// Port status bits from the last cycle (0 until the first cycle)
    pub status: PortStatus,
    /// Reported out of view in the last cycle
    pub absent: bool,
    /// Last decoded sample
    pub transform: Option<TransformSample>,
}

impl ToolBinding {
    fn new(tool_id: String, handle: PortHandle) -> Self {
        Self {
            tool_id,
            handle,
            status: PortStatus::default(),
            absent: false,
            transform: None,
        }
    }
}

/// Per-cycle update for one tool
#[derive(Debug, Clone, PartialEq)]
pub struct CycleUpdate {
    pub status: PortStatus,
    pub absent: bool,
    /// New sample; `None` leaves the stored sample untouched
    pub transform: Option<TransformSample>,
}

/// Immutable copy of the registry
pub type RegistrySnapshot = BTreeMap<String, ToolBinding>;

/// Tool identifier ↔ port handle bindings
#[derive(Debug, Default)]
pub struct ToolRegistry {
    bindings: BTreeMap<String, ToolBinding>,
    by_handle: BTreeMap<PortHandle, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.bindings.contains_key(tool_id)
    }

    /// Check that a tool could be bound to `handle`
    pub fn check_available(&self, tool_id: &str, handle: Option<PortHandle>) -> Result<(), RegistryError> {
        if self.contains(tool_id) {
            return Err(RegistryError::DuplicateTool(tool_id.to_string()));
        }
        if let Some(handle) = handle {
            if let Some(owner) = self.by_handle.get(&handle) {
                return Err(RegistryError::HandleInUse {
                    handle,
                    tool: owner.clone(),
                });
            }
        }
        Ok(())
    }

    /// Bind a tool with zeroed status
    pub fn insert(&mut self, tool_id: &str, handle: PortHandle) -> Result<(), RegistryError> {
        self.check_available(tool_id, Some(handle))?;
        self.by_handle.insert(handle, tool_id.to_string());
        self.bindings
            .insert(tool_id.to_string(), ToolBinding::new(tool_id.to_string(), handle));
        Ok(())
    }

    /// Unbind a tool, returning its last state
    pub fn remove(&mut self, tool_id: &str) -> Result<ToolBinding, RegistryError> {
        let binding = self
            .bindings
            .remove(tool_id)
            .ok_or_else(|| RegistryError::UnknownTool(tool_id.to_string()))?;
        self.by_handle.remove(&binding.handle);
        Ok(binding)
    }

    pub fn binding(&self, tool_id: &str) -> Option<&ToolBinding> {
        self.bindings.get(tool_id)
    }

    /// Tool bound to a handle
    pub fn handle_owner(&self, handle: PortHandle) -> Option<&str> {
        self.by_handle.get(&handle).map(String::as_str)
    }

    /// `(tool, handle)` pairs in tool order
    pub fn ports(&self) -> Vec<(String, PortHandle)> {
        self.bindings
            .values()
            .map(|b| (b.tool_id.clone(), b.handle))
            .collect()
    }

    /// Store one cycle's result for a tool; unknown tools are ignored
    ///
    /// Status and absent flag are always replaced. The stored sample only
    /// changes when the update carries one.
    pub fn apply(&mut self, tool_id: &str, update: CycleUpdate) -> bool {
        let Some(binding) = self.bindings.get_mut(tool_id) else {
            return false;
        };
        binding.status = update.status;
        binding.absent = update.absent;
        if let Some(sample) = update.transform {
            binding.transform = Some(sample);
        }
        true
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.bindings.clone()
    }

    /// Drop every binding
    pub fn clear(&mut self) {
        self.bindings.clear();
        self.by_handle.clear();
    }
}

/// Accept a polling frequency in Hz
///
/// Zero is allowed and means "poll as fast as the device answers".
/// Negative, NaN and infinite values are rejected.
///
/// # Examples
///
/// ```
/// use igt_tracker::tracking::registry::validate_polling_frequency;
///
/// assert_eq!(validate_polling_frequency(60.0).unwrap(), 60.0);
/// assert!(validate_polling_frequency(-1.0).is_err());
/// ```
pub fn validate_polling_frequency(hz: f64) -> Result<f64, RegistryError> {
    if hz.is_finite() && hz >= 0.0 {
        Ok(hz)
    } else {
        Err(RegistryError::InvalidFrequency(hz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_insert_and_remove() {
        let mut registry = ToolRegistry::new();
        registry.insert("probe", 0x0A).unwrap();
        registry.insert("reference", 0x0B).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.handle_owner(0x0A), Some("probe"));

        let binding = registry.binding("probe").unwrap();
        assert_eq!(binding.status, PortStatus(0));
        assert!(!binding.absent);
        assert!(binding.transform.is_none());

        let removed = registry.remove("probe").unwrap();
        assert_eq!(removed.handle, 0x0A);
        assert_eq!(registry.handle_owner(0x0A), None);
        assert_eq!(registry.ports(), vec![("reference".to_string(), 0x0B)]);
    }

    #[test]
    fn test_duplicate_and_handle_conflicts() {
        let mut registry = ToolRegistry::new();
        registry.insert("probe", 0x0A).unwrap();
        assert_eq!(
            registry.insert("probe", 0x0C),
            Err(RegistryError::DuplicateTool("probe".to_string()))
        );
        assert_eq!(
            registry.insert("other", 0x0A),
            Err(RegistryError::HandleInUse {
                handle: 0x0A,
                tool: "probe".to_string()
            })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_unknown_leaves_state() {
        let mut registry = ToolRegistry::new();
        registry.insert("probe", 0x0A).unwrap();
        let before = registry.snapshot();
        assert_eq!(
            registry.remove("ghost"),
            Err(RegistryError::UnknownTool("ghost".to_string()))
        );
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn test_apply_keeps_sample_without_update() {
        let mut registry = ToolRegistry::new();
        registry.insert("probe", 0x0A).unwrap();
        let sample = TransformSample {
            rotation: Default::default(),
            translation: [1.0, 2.0, 3.0],
            error_estimate: 0.2,
            valid_until: Instant::now(),
        };
        assert!(registry.apply(
            "probe",
            CycleUpdate {
                status: PortStatus(PortStatus::AVAILABLE_MASK),
                absent: false,
                transform: Some(sample),
            }
        ));
        assert!(registry.apply(
            "probe",
            CycleUpdate {
                status: PortStatus(PortStatus::AVAILABLE_MASK),
                absent: true,
                transform: None,
            }
        ));
        let binding = registry.binding("probe").unwrap();
        assert!(binding.absent);
        assert_eq!(binding.transform, Some(sample));
        assert!(!registry.apply("ghost", CycleUpdate {
            status: PortStatus(0),
            absent: false,
            transform: None,
        }));
    }

    #[test]
    fn test_frequency_validation() {
        assert_eq!(validate_polling_frequency(0.0), Ok(0.0));
        assert!(validate_polling_frequency(-0.5).is_err());
        assert!(validate_polling_frequency(f64::NAN).is_err());
        assert!(validate_polling_frequency(f64::INFINITY).is_err());
    }
}
