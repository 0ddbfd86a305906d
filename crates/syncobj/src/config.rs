//! Configuration for synchronized objects

use serde::{Deserialize, Serialize};
use syncobj_store::StoreConfig;

use crate::channel::channel_name;

/// Default payload capacity of a channel region in bytes.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default channel prefix.
pub const DEFAULT_PREFIX: &str = "SyncedObject";

/// Configuration for synchronized objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Payload capacity used when a channel is first created
    pub capacity: usize,

    /// Prefix of every channel name
    pub prefix: String,

    /// Shared region settings
    pub store: StoreConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            prefix: DEFAULT_PREFIX.to_string(),
            store: StoreConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Create a new configuration with the specified capacity and prefix
    pub fn new(capacity: usize, prefix: impl Into<String>) -> Self {
        Self {
            capacity,
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Set the region capacity
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the channel prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the shared region settings
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Channel name for a type under this configuration's prefix.
    pub fn channel_for(&self, type_name: &str) -> String {
        channel_name(&self.prefix, type_name)
    }
}
