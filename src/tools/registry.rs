//! In-memory tool catalog.
//!
//! The registry owns every [`ToolSpec`] behind an `Arc`, so a resolved tool
//! stays usable after the registry lock is released. It never invokes
//! handlers itself.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::tools::spec::{ToolDescriptor, ToolFilter, ToolSpec};
use crate::types::ToolName;
use crate::validation::JsonSchemaValidator;

/// Registry shared between the dispatcher and the transports.
pub type SharedRegistry = Arc<RwLock<ToolRegistry>>;

/// Live catalog record: the immutable spec plus mutable enablement.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    spec: Arc<ToolSpec>,
    enabled: bool,
    seq: u64,
}

impl RegistryEntry {
    pub fn spec(&self) -> &Arc<ToolSpec> {
        &self.spec
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Registry for tool specs, keyed by unique name.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    entries: HashMap<ToolName, RegistryEntry>,
    next_seq: u64,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap this registry for sharing across tasks.
    pub fn shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Add a tool. Existing names are never overwritten.
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if spec.name.is_empty() || spec.name.as_str().trim() != spec.name.as_str() {
            return Err(RegistryError::InvalidSpec {
                name: spec.name.clone(),
                reason: "name must be non-empty without surrounding whitespace".to_string(),
            });
        }
        if let Some(kind) = spec.parameter_schema.get("type")
            && kind != &Value::String("object".to_string())
        {
            return Err(RegistryError::InvalidSpec {
                name: spec.name.clone(),
                reason: format!("parameter schema must describe an object, got type {}", kind),
            });
        }
        if let Err(e) = JsonSchemaValidator::check_schema(&spec.parameter_schema) {
            return Err(RegistryError::InvalidSpec {
                name: spec.name.clone(),
                reason: e.to_string(),
            });
        }
        if self.entries.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateName(spec.name.clone()));
        }

        info!(
            tool = %spec.name,
            permission = %spec.permission,
            streaming = spec.handler.is_streaming(),
            enabled = spec.enabled,
            "Registered tool"
        );

        let seq = self.next_seq;
        self.next_seq += 1;
        let name = spec.name.clone();
        let enabled = spec.enabled;
        self.entries.insert(
            name,
            RegistryEntry {
                spec: Arc::new(spec),
                enabled,
                seq,
            },
        );
        Ok(())
    }

    /// Remove a tool, enabled or not. Returns whether it existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            info!(tool = %name, "Unregistered tool");
        }
        removed
    }

    /// Resolve an enabled tool. Disabled tools look exactly like absent ones.
    pub fn lookup(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.entries
            .get(name)
            .filter(|entry| entry.enabled)
            .map(|entry| Arc::clone(&entry.spec))
    }

    /// Describe an enabled tool.
    pub fn describe(&self, name: &str) -> Option<ToolDescriptor> {
        self.lookup(name).map(|spec| spec.descriptor())
    }

    /// Enabled tools matching `filter`, in registration order.
    pub fn enumerate(&self, filter: &ToolFilter) -> Vec<ToolDescriptor> {
        let mut matching: Vec<&RegistryEntry> = self
            .entries
            .values()
            .filter(|entry| entry.enabled && filter.matches(&entry.spec))
            .collect();
        matching.sort_by_key(|entry| entry.seq);
        matching.iter().map(|entry| entry.spec.descriptor()).collect()
    }

    /// Toggle enablement. Returns `false` if the name is unknown.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                if entry.enabled != enabled {
                    info!(tool = %name, enabled, "Changed tool enablement");
                } else {
                    debug!(tool = %name, enabled, "Tool enablement unchanged");
                }
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Whether a tool with this name is registered, enabled or not.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Raw entry access, including disabled tools.
    pub fn entry(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered names, in registration order.
    pub fn names(&self) -> Vec<ToolName> {
        let mut entries: Vec<&RegistryEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.spec.name.clone()).collect()
    }
}
