//! Objects shared by every process bound to the same channel.
//!
//! A [`SyncObject`] attaches to a named shared region, registers itself in the
//! channel's roster, and exposes two kinds of attributes:
//!
//! - **Shared attributes** live in the region's flat key space. A value set
//!   through one handle is readable through every other handle on the
//!   channel, in any process, as soon as the call returns.
//! - **Local-only fields** (`_serializer`, `_memory_block`, `id`, `name`)
//!   live in process memory and are never written to the region.
//!
//! Every handle gets a participant id one above the current roster maximum.
//! The participant with the lowest registered id is the *eldest*; a
//! [`Client`] uses that to seed shared defaults exactly once.
//!
//! Channels are named `<prefix>__<TypeName>`, so all objects of one type
//! share one region.
//!
//! # Example
//!
//! ```rust,no_run
//! use syncobj::{Client, SyncConfig};
//!
//! # fn example() -> syncobj::Result<()> {
//! let config = SyncConfig::default();
//! let first = Client::open(&config)?;
//! first.set_token("aaa.bbb.ccc")?;
//!
//! let second = Client::open(&config)?;
//! assert_eq!(second.token()?.as_deref(), Some("aaa.bbb.ccc"));
//! assert_eq!(second.timeout()?.as_secs(), 3600);
//!
//! first.close()?;
//! assert!(second.is_eldest()?);
//! second.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use thiserror::Error;

// Channel naming
pub mod channel;

// Configuration
pub mod config;

// Participant roster
pub mod roster;

// Local-only fields
pub mod attr;

// Registered shared object
mod object;

// Client specialization
pub mod client;

pub use attr::{LocalField, LocalFields};
pub use channel::{SyncedType, channel_name};
pub use client::{Client, Method};
pub use config::SyncConfig;
pub use object::SyncObject;
pub use roster::{ParticipantId, ROSTER_KEY, Roster};

pub use serde_json::Value;
pub use syncobj_store::{Entries, SharedStore, StoreConfig, StoreError};

/// Result type for synchronized object operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur on a synchronized object.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Shared store failure (attach, capacity, lock timeout, corruption).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Key is neither a local-only field nor present in the shared store.
    #[error("Key not found: {0}")]
    MissingKey(String),

    /// Own id is absent from the roster during deregistration.
    #[error("Participant {id} is not registered on channel {channel}")]
    NotRegistered {
        /// Participant id.
        id: ParticipantId,
        /// Channel name.
        channel: String,
    },

    /// Roster is empty while this participant is attached.
    #[error("Roster of channel {channel} is empty while participant {id} is attached")]
    EmptyRoster {
        /// Participant id.
        id: ParticipantId,
        /// Channel name.
        channel: String,
    },

    /// Local-only field holds a process resource and cannot be replaced.
    #[error("Local-only field {0} is read-only")]
    ReadOnlyField(String),

    /// Shared write targeted a local-only field name.
    #[error("{0} is a local-only field and is never shared")]
    LocalOnlyKey(String),

    /// Value has the wrong shape for its key.
    #[error("Invalid value for {key}: {source}")]
    InvalidValue {
        /// Key being read or written.
        key: String,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },
}

impl SyncError {
    /// Whether the error means the roster no longer matches the attached
    /// participants.
    ///
    /// These errors mean a concurrent writer bypassed the roster
    /// transaction and are not recoverable by retrying.
    pub const fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::NotRegistered { .. } | Self::EmptyRoster { .. })
    }
}

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
