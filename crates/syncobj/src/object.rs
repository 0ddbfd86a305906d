//! Registered handle on a shared channel.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use syncobj_store::{Entries, SharedStore};
use tracing::{debug, error, info};

use crate::attr::{LocalField, LocalFields};
use crate::channel::SyncedType;
use crate::config::SyncConfig;
use crate::roster::{ParticipantId, ROSTER_KEY, Roster};
use crate::{Result, SyncError};

/// One participant's handle on a shared channel.
///
/// Opening a handle registers a fresh participant id in the channel roster;
/// [`close`](Self::close) removes it again. Dropping an open handle performs
/// the same deregistration, so every registration is matched on every exit
/// path. Prefer `close` where the outcome matters: `Drop` can only log a
/// failure.
///
/// Shared attributes are read and written with [`get`](Self::get) and
/// [`set`](Self::set). [`attr`](Self::attr) and [`set_attr`](Self::set_attr)
/// give the combined view, where the local-only names in [`LocalField`]
/// resolve to process memory and everything else to the shared store.
pub struct SyncObject {
    local: LocalFields,
    store: SharedStore,
    deregistered: bool,
}

impl SyncObject {
    /// Open a handle on the channel of type `T`.
    pub fn open<T: SyncedType + ?Sized>(config: &SyncConfig) -> Result<Self> {
        Self::open_channel(&config.channel_for(T::TYPE_NAME), config)
    }

    /// Open a handle on an explicitly named channel.
    ///
    /// Attaches to the region and registers a new participant id in one
    /// locked transaction. If attaching fails, the roster is untouched.
    pub fn open_channel(channel: &str, config: &SyncConfig) -> Result<Self> {
        let store = SharedStore::attach(channel, config.capacity, &config.store)?;

        let id = store.update(|entries| {
            let mut roster = Roster::load(entries)?;
            let id = roster.register();
            roster.save(entries);
            Ok::<_, SyncError>(id)
        })?;

        info!("Registered participant {} on channel {}", id, channel);

        Ok(Self {
            local: LocalFields {
                id,
                name: channel.to_string(),
                memory_block: store.path().to_path_buf(),
            },
            store,
            deregistered: false,
        })
    }

    /// Own participant id.
    pub const fn id(&self) -> ParticipantId {
        self.local.id
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.local.name
    }

    /// Local-only fields of this handle.
    pub const fn local(&self) -> &LocalFields {
        &self.local
    }

    /// Underlying shared store.
    pub const fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Current roster of the channel.
    pub fn roster(&self) -> Result<Roster> {
        Ok(self.try_get(ROSTER_KEY)?.unwrap_or_default())
    }

    /// Whether this participant has the lowest registered id.
    ///
    /// Recomputed on every call, so eldest-ness moves to a surviving
    /// participant once the eldest leaves. An empty roster while this
    /// handle is open is a consistency violation and is returned as
    /// [`SyncError::EmptyRoster`].
    pub fn is_eldest(&self) -> Result<bool> {
        let roster = self.roster()?;
        roster.is_eldest(self.id()).ok_or_else(|| {
            error!(
                "Roster of channel {} is empty while participant {} is attached",
                self.name(),
                self.id()
            );
            SyncError::EmptyRoster {
                id: self.id(),
                channel: self.name().to_string(),
            }
        })
    }

    /// Read an attribute through the combined view.
    ///
    /// Local-only names resolve to this handle's fields; any other key is
    /// read from the shared store. A key set nowhere yields
    /// [`SyncError::MissingKey`], while a stored null yields `Value::Null`.
    pub fn attr(&self, key: &str) -> Result<Value> {
        if let Some(field) = LocalField::from_key(key) {
            return Ok(self.local.get(field));
        }
        self.store
            .get(key)?
            .ok_or_else(|| SyncError::MissingKey(key.to_string()))
    }

    /// Write an attribute through the combined view.
    ///
    /// Local-only names change this handle only and are never visible to
    /// other participants; any other key is written to the shared store.
    pub fn set_attr(&mut self, key: &str, value: Value) -> Result<()> {
        match LocalField::from_key(key) {
            Some(field) => {
                debug!("Setting local-only field {} on participant {}", field, self.id());
                self.local.set(field, value)
            }
            None => Ok(self.store.set(key, &value)?),
        }
    }

    /// Read and decode a shared attribute.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.try_get(key)?
            .ok_or_else(|| SyncError::MissingKey(key.to_string()))
    }

    /// Read and decode a shared attribute, or `default` if it is not set.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.try_get(key)?.unwrap_or(default))
    }

    /// Read and decode a shared attribute if it is set.
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.store
            .get(key)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|source| SyncError::InvalidValue {
                key: key.to_string(),
                source,
            })
    }

    /// Write a shared attribute, visible to every participant on return.
    ///
    /// Local-only names are rejected with [`SyncError::LocalOnlyKey`] so
    /// they can never be shadowed by a shared key.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        if LocalField::from_key(key).is_some() {
            return Err(SyncError::LocalOnlyKey(key.to_string()));
        }
        Ok(self.store.set(key, value)?)
    }

    /// Remove a shared attribute. Returns `false` if it was not set.
    pub fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.store.delete(key)?)
    }

    /// Whether a shared attribute is set.
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.store.contains(key)?)
    }

    /// Copy of every shared attribute, including the roster.
    pub fn snapshot(&self) -> Result<Entries> {
        Ok(self.store.snapshot()?)
    }

    /// Deregister from the roster and detach from the channel.
    ///
    /// Fails with [`SyncError::NotRegistered`] if this participant's id is
    /// no longer in the roster. The handle is detached either way.
    pub fn close(mut self) -> Result<()> {
        self.deregister()
    }

    fn deregister(&mut self) -> Result<()> {
        if self.deregistered {
            return Ok(());
        }
        self.deregistered = true;

        let id = self.id();
        let channel = self.local.name.clone();
        let result = self.store.update(|entries| {
            let mut roster = Roster::load(entries)?;
            if !roster.deregister(id) {
                return Err(SyncError::NotRegistered {
                    id,
                    channel: channel.clone(),
                });
            }
            roster.save(entries);
            Ok(roster)
        });

        match result {
            Ok(roster) => {
                info!(
                    "Deregistered participant {} from channel {} ({} remaining)",
                    id,
                    channel,
                    roster.len()
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to deregister participant {} from channel {}: {}", id, channel, e);
                Err(e)
            }
        }
    }
}

impl Drop for SyncObject {
    fn drop(&mut self) {
        if !self.deregistered {
            debug!("Participant {} dropped without close", self.id());
            // Failures are logged by deregister.
            let _ = self.deregister();
        }
    }
}

impl fmt::Debug for SyncObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncObject")
            .field("id", &self.local.id)
            .field("name", &self.local.name)
            .field("memory_block", &self.local.memory_block)
            .finish_non_exhaustive()
    }
}
