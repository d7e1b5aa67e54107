//! Configuration for stores and mergeable stores

use serde::{Deserialize, Serialize};

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of released row ids kept per table for reuse
    #[serde(default = "default_pool_size")]
    pub row_id_pool_size: usize,

    /// Maximum number of released listener ids kept for reuse
    #[serde(default = "default_pool_size")]
    pub listener_id_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            row_id_pool_size: default_pool_size(),
            listener_id_pool_size: default_pool_size(),
        }
    }
}

/// Mergeable store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeableConfig {
    /// Seed for the client part of every HLC this replica issues. A random
    /// one is used when absent.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Configuration of the underlying store
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_pool_size() -> usize {
    1000
}
