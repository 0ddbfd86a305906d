//! Local-only fields.
//!
//! These names are reserved: reads and writes of them never touch the
//! shared store. They hold per-process state (the region handle, the value
//! codec) or the participant's identity, which would break the roster if
//! another process could overwrite it.

use std::fmt;
use std::path::PathBuf;

use serde_json::Value;

use crate::roster::ParticipantId;
use crate::{Result, SyncError};

/// Codec name reported by the `_serializer` field.
pub const SERIALIZER_NAME: &str = "json";

/// Name of a local-only field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalField {
    /// Value codec used for shared attributes.
    Serializer,
    /// Backing region of this attachment.
    MemoryBlock,
    /// Own participant id.
    Id,
    /// Channel name.
    Name,
}

impl LocalField {
    /// Every local-only field.
    pub const ALL: [Self; 4] = [Self::Serializer, Self::MemoryBlock, Self::Id, Self::Name];

    /// Attribute key of the field.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Serializer => "_serializer",
            Self::MemoryBlock => "_memory_block",
            Self::Id => "id",
            Self::Name => "name",
        }
    }

    /// Look up the local-only field for an attribute key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }

    /// Whether the field holds a process resource that cannot be replaced.
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Serializer | Self::MemoryBlock)
    }
}

impl fmt::Display for LocalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-process state of a synchronized object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFields {
    /// Participant id.
    pub id: ParticipantId,
    /// Channel name.
    pub name: String,
    /// Path of the mapped region.
    pub memory_block: PathBuf,
}

impl LocalFields {
    /// Read a field as an attribute value.
    pub fn get(&self, field: LocalField) -> Value {
        match field {
            LocalField::Serializer => Value::from(SERIALIZER_NAME),
            LocalField::MemoryBlock => Value::from(self.memory_block.to_string_lossy().into_owned()),
            LocalField::Id => Value::from(self.id),
            LocalField::Name => Value::from(self.name.clone()),
        }
    }

    /// Replace a field from an attribute value.
    ///
    /// `id` takes a non-negative integer and `name` a string; the resource
    /// fields are read-only.
    pub fn set(&mut self, field: LocalField, value: Value) -> Result<()> {
        let invalid = |source: serde_json::Error| SyncError::InvalidValue {
            key: field.key().to_string(),
            source,
        };
        match field {
            LocalField::Id => self.id = serde_json::from_value(value).map_err(invalid)?,
            LocalField::Name => self.name = serde_json::from_value(value).map_err(invalid)?,
            LocalField::Serializer | LocalField::MemoryBlock => {
                return Err(SyncError::ReadOnlyField(field.key().to_string()));
            }
        }
        Ok(())
    }
}
