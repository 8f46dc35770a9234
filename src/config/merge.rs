//! Merge and traversal configuration

use serde::{Deserialize, Serialize};

/// Merge engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Records committed per store transaction
    pub batch_size: usize,
    /// Stop each file after this many records (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_records: Option<usize>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_records: None,
        }
    }
}

/// Group traversal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Depth used when a query does not give one
    pub default_max_depth: u32,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_max_depth: crate::graph::DEFAULT_MAX_DEPTH,
        }
    }
}
