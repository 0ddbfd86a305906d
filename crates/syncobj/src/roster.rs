//! Participant roster.
//!
//! The roster is the ordered list of participant ids currently registered
//! on a channel. It is stored as a JSON array of integers under
//! [`ROSTER_KEY`] in the channel's key space.
//!
//! Ids are allocated as one above the current maximum (or 0 for an empty
//! roster). There is no free list: a departed low id is never handed out
//! again while a higher id is registered.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use syncobj_store::Entries;

use crate::{Result, SyncError};

/// Shared key holding the roster.
pub const ROSTER_KEY: &str = "registered_client_ids";

/// Participant identifier, unique among the participants of a channel.
pub type ParticipantId = u64;

/// Ordered list of registered participant ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    ids: Vec<ParticipantId>,
}

impl Roster {
    /// Create an empty roster.
    pub const fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Create a roster from ids in registration order.
    pub fn from_ids(ids: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Read the roster from a channel's key space. Absent means empty.
    pub fn load(entries: &Entries) -> Result<Self> {
        entries
            .get(ROSTER_KEY)
            .map(|value| Self::deserialize(value))
            .transpose()
            .map(Option::unwrap_or_default)
            .map_err(|source| SyncError::InvalidValue {
                key: ROSTER_KEY.to_string(),
                source,
            })
    }

    /// Write the roster into a channel's key space.
    pub fn save(&self, entries: &mut Entries) {
        entries.insert(ROSTER_KEY.to_string(), Value::from(self.ids.clone()));
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> &[ParticipantId] {
        &self.ids
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no participant is registered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.ids.contains(&id)
    }

    /// Id the next participant will receive.
    pub fn next_id(&self) -> ParticipantId {
        self.ids.iter().max().map_or(0, |max| max + 1)
    }

    /// Allocate the next id and append it.
    pub fn register(&mut self) -> ParticipantId {
        let id = self.next_id();
        self.ids.push(id);
        id
    }

    /// Remove `id`. Returns `false` if it was not registered.
    pub fn deregister(&mut self, id: ParticipantId) -> bool {
        let Some(position) = self.ids.iter().position(|&p| p == id) else {
            return false;
        };
        self.ids.remove(position);
        true
    }

    /// Lowest registered id.
    pub fn eldest(&self) -> Option<ParticipantId> {
        self.ids.iter().min().copied()
    }

    /// Whether `id` is the lowest registered id.
    ///
    /// Returns `None` for an empty roster.
    pub fn is_eldest(&self, id: ParticipantId) -> Option<bool> {
        self.eldest().map(|eldest| eldest == id)
    }
}
