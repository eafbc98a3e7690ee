//! Managed-container label schema.
//!
//! Every container this service creates carries a fixed marker label plus
//! derived metadata. The raw engine label map is only read and written here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marker label distinguishing managed containers from unrelated ones.
pub const MANAGED_LABEL: &str = "dockapi.managed";
/// Optional friendly name.
pub const NAME_LABEL: &str = "dockapi.name";
/// Published container port.
pub const PORT_LABEL: &str = "dockapi.container_port";

/// Typed view of the managed label set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedLabels {
    /// Friendly name given at creation time.
    pub name: Option<String>,
    /// The container port selected for publishing.
    pub container_port: u16,
}

impl ManagedLabels {
    /// Renders the schema as a raw engine label map.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(PORT_LABEL.to_string(), self.container_port.to_string());
        if let Some(name) = &self.name {
            labels.insert(NAME_LABEL.to_string(), name.clone());
        }
        labels
    }

    /// Reads the schema back from a raw engine label map.
    ///
    /// Returns `None` when the marker is absent or the port label is missing
    /// or unparsable.
    #[must_use]
    pub fn from_map(labels: &HashMap<String, String>) -> Option<Self> {
        if labels.get(MANAGED_LABEL).map(String::as_str) != Some("true") {
            return None;
        }
        let container_port = labels.get(PORT_LABEL)?.parse::<u16>().ok()?;
        if container_port == 0 {
            return None;
        }
        Some(Self {
            name: labels.get(NAME_LABEL).filter(|n| !n.is_empty()).cloned(),
            container_port,
        })
    }

    /// Engine label filter selecting managed containers.
    #[must_use]
    pub fn marker_filter() -> String {
        format!("{MANAGED_LABEL}=true")
    }
}
