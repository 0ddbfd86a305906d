//! Configuration for shared regions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time to wait for a channel lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between lock attempts.
pub const DEFAULT_LOCK_RETRY: Duration = Duration::from_millis(2);

/// Configuration for attaching to shared regions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding region and lock files
    pub directory: PathBuf,

    /// Maximum time to wait for the channel lock
    pub lock_timeout: Duration,

    /// Sleep between lock attempts
    pub lock_retry: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_retry: DEFAULT_LOCK_RETRY,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with the specified region directory
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set the region directory
    #[must_use]
    pub fn with_directory<P: AsRef<Path>>(mut self, directory: P) -> Self {
        self.directory = directory.as_ref().to_path_buf();
        self
    }

    /// Set the lock timeout
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the interval between lock attempts
    #[must_use]
    pub const fn with_lock_retry(mut self, retry: Duration) -> Self {
        self.lock_retry = retry;
        self
    }

    /// Path of the region file for a channel.
    pub fn region_path(&self, name: &str) -> PathBuf {
        self.directory
            .join(format!("{name}.{}", crate::REGION_FILE_EXTENSION))
    }

    /// Path of the lock file for a channel.
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!(
            "{name}.{}.{}",
            crate::REGION_FILE_EXTENSION,
            crate::LOCK_FILE_EXTENSION
        ))
    }
}

/// `/dev/shm` keeps regions in RAM on Linux; elsewhere the temp dir is used.
fn default_directory() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if cfg!(target_os = "linux") && shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}
