//! Shared client settings.
//!
//! A [`Client`] is a [`SyncObject`] on the `Client` channel. Its eldest
//! participant seeds the shared defaults when it opens; later participants
//! read whatever is already there.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tracing::debug;

use crate::channel::SyncedType;
use crate::config::SyncConfig;
use crate::object::SyncObject;
use crate::Result;

/// Shared key of the request timeout, in whole seconds.
pub const TIMEOUT_KEY: &str = "timeout";

/// Shared key of the access token.
pub const TOKEN_KEY: &str = "token";

/// Timeout seeded by the eldest client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Request methods a client can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
}

impl Method {
    /// Lowercase method name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client settings shared by every process.
#[derive(Debug)]
pub struct Client {
    object: SyncObject,
}

impl SyncedType for Client {
    const TYPE_NAME: &'static str = "Client";
}

impl Client {
    /// Methods every client supports.
    pub const SUPPORTED_METHODS: [Method; 2] = [Method::Get, Method::Post];

    /// Open a client and seed the defaults if it is the eldest.
    ///
    /// A failure after registration drops the handle, which deregisters it
    /// again.
    pub fn open(config: &SyncConfig) -> Result<Self> {
        let object = SyncObject::open::<Self>(config)?;
        if object.is_eldest()? {
            object.set(TIMEOUT_KEY, &DEFAULT_TIMEOUT.as_secs())?;
            debug!(
                "Participant {} seeded {} = {}s on channel {}",
                object.id(),
                TIMEOUT_KEY,
                DEFAULT_TIMEOUT.as_secs(),
                object.name()
            );
        }
        Ok(Self { object })
    }

    /// Whether `method` is supported.
    pub fn supports(method: Method) -> bool {
        Self::SUPPORTED_METHODS.contains(&method)
    }

    /// Shared request timeout.
    pub fn timeout(&self) -> Result<Duration> {
        self.object.get::<u64>(TIMEOUT_KEY).map(Duration::from_secs)
    }

    /// Replace the shared request timeout. Sub-second precision is dropped.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.object.set(TIMEOUT_KEY, &timeout.as_secs())
    }

    /// Shared access token, if one has been set.
    pub fn token(&self) -> Result<Option<String>> {
        self.object.try_get(TOKEN_KEY)
    }

    /// Replace the shared access token.
    pub fn set_token(&self, token: &str) -> Result<()> {
        self.object.set(TOKEN_KEY, token)
    }

    /// Deregister and detach.
    pub fn close(self) -> Result<()> {
        self.object.close()
    }

    /// Underlying synchronized object.
    pub fn into_inner(self) -> SyncObject {
        self.object
    }
}

impl Deref for Client {
    type Target = SyncObject;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl DerefMut for Client {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.object
    }
}
