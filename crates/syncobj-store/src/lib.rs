//! Named shared memory key/value regions.
//!
//! A region is a memory-mapped file identified by a channel name. Every
//! process that attaches with the same name maps the same bytes, so a value
//! written through one handle is visible to every other handle as soon as the
//! write returns.
//!
//! # Region Layout
//!
//! - Offset 0x00: magic `SYNC`
//! - Offset 0x04: format version
//! - Offset 0x08: payload capacity
//! - Offset 0x10: payload length
//! - Offset 0x18: generation counter
//! - Offset 0x20: JSON payload (object of key to value)
//!
//! Each operation holds the channel lock file for its duration, so single
//! operations are atomic across processes. [`SharedStore::update`] extends
//! that to an arbitrary read-modify-write over the whole key space.
//!
//! # Example
//!
//! ```rust,no_run
//! use syncobj_store::{SharedStore, StoreConfig};
//!
//! # fn example() -> syncobj_store::Result<()> {
//! let store = SharedStore::attach("SyncedObject__Client", 1024, &StoreConfig::default())?;
//! store.set("timeout", &3600)?;
//! let timeout: u64 = store.get_as("timeout")?.unwrap_or_default();
//! assert_eq!(timeout, 3600);
//! store.detach();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use thiserror::Error;

// Configuration
pub mod config;

// Cross-process lock file
pub mod lock;

// Region header layout
pub mod region;

// Key/value store over a region
mod store;

pub use config::StoreConfig;
pub use lock::ChannelLock;
pub use region::RegionHeader;
pub use store::{Entries, SharedStore};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The region could not be created or joined.
    #[error("Cannot attach to channel {name}: {reason}")]
    Attach {
        /// Channel name.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// Channel name is not usable as a region file name.
    #[error("Invalid channel name: {0:?}")]
    InvalidName(String),

    /// Encoded key space does not fit the region.
    #[error("Region {name} too small: {required} bytes required, capacity is {capacity}")]
    Capacity {
        /// Channel name.
        name: String,
        /// Bytes the write needed.
        required: usize,
        /// Payload capacity of the region.
        capacity: usize,
    },

    /// Channel lock could not be acquired in time.
    #[error("Lock timeout: {0}")]
    Timeout(String),

    /// Region header or payload is unreadable.
    #[error("Region corruption detected: {0}")]
    Corruption(String),

    /// Value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Version information for the store crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File extension of a region file.
pub const REGION_FILE_EXTENSION: &str = "shm";

/// File extension of a region lock file, appended to the region file name.
pub const LOCK_FILE_EXTENSION: &str = "lock";

/// Check that a channel name can be used as a region file name.
///
/// Names must be non-empty, at most 200 bytes, and must not contain path
/// separators, NUL, or start with a dot.
pub fn validate_channel_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 200
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}
