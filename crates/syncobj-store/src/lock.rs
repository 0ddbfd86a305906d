//! Lock file for cross-process mutual exclusion on a channel.
//!
//! Each channel has a persistent lock file next to its region. Exclusion is
//! an OS advisory lock on that file (`flock` on Unix, `LockFileEx` on
//! Windows), taken through `fd-lock`. The OS drops the lock when the holding
//! handle is closed, including when its process dies, so an abandoned lock
//! never blocks other participants and a slow holder is never preempted.
//!
//! The lock file itself is never removed: unlinking it while another process
//! waits on the old inode would let two holders in at once.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use fd_lock::RwLock;
use tracing::debug;

use crate::{Result, StoreConfig, StoreError};

/// Exclusive lock on one channel.
///
/// Opening the lock only opens the file; [`hold`](Self::hold) takes the
/// lock for the duration of a closure.
pub struct ChannelLock {
    /// The lock file handle.
    lock: RwLock<File>,
    /// Path to the lock file.
    path: PathBuf,
}

impl std::fmt::Debug for ChannelLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ChannelLock {
    /// Open the lock file for `name`, creating it if needed.
    pub fn open(name: &str, config: &StoreConfig) -> Result<Self> {
        Self::open_path(&config.lock_path(name))
    }

    /// Open a lock file at an explicit path.
    pub fn open_path(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| {
                StoreError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to open lock file {}: {e}", lock_path.display()),
                ))
            })?;

        Ok(Self {
            lock: RwLock::new(file),
            path: lock_path.to_path_buf(),
        })
    }

    /// Run `f` while holding the lock, waiting up to `config.lock_timeout`.
    ///
    /// Retries every `config.lock_retry`. The lock is released when `f`
    /// returns.
    pub fn hold<R>(&mut self, config: &StoreConfig, f: impl FnOnce() -> R) -> Result<R> {
        let start = Instant::now();

        let mut guard = loop {
            match self.lock.try_write() {
                Ok(guard) => break guard,
                Err(e) if start.elapsed() >= config.lock_timeout => {
                    let owner = std::fs::read_to_string(&self.path).unwrap_or_default();
                    return Err(StoreError::Timeout(format!(
                        "lock not acquired after {:?}: {} (held by pid {:?}, last error: {e})",
                        config.lock_timeout,
                        self.path.display(),
                        owner.trim()
                    )));
                }
                Err(_) => std::thread::sleep(config.lock_retry),
            }
        };

        // The PID is informational only; a failed write still holds the lock.
        if guard.set_len(0).is_ok() {
            let _ = write!(guard, "{}", std::process::id());
        }
        debug!("Acquired lock {}", self.path.display());

        Ok(f())
    }

    /// Get the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
