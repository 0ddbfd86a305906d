//! Key/value store over a shared region.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::lock::ChannelLock;
use crate::region::{HEADER_SIZE, RegionHeader, region_size};
use crate::{Result, StoreConfig, StoreError, validate_channel_name};

/// Decoded key space of a region.
pub type Entries = BTreeMap<String, Value>;

/// Handle to one attachment of a shared region.
///
/// Every method takes the channel lock for its duration, so each call is
/// atomic with respect to every other handle on the same channel, in this
/// process or another one.
pub struct SharedStore {
    /// Channel name.
    name: String,
    /// Region file path.
    path: PathBuf,
    /// Configuration used to attach (lock paths and timeouts).
    config: StoreConfig,
    /// Payload capacity read from the region header at attach time.
    capacity: usize,
    /// Mapped region and lock; the mutex serializes threads sharing this handle.
    region: Mutex<Region>,
}

/// Per-handle state guarded by the in-process mutex.
struct Region {
    map: MmapMut,
    lock: ChannelLock,
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Drop for SharedStore {
    fn drop(&mut self) {
        debug!("Detached from channel {}", self.name);
    }
}

impl SharedStore {
    /// Create or join the region named `name`.
    ///
    /// The first attach creates the region with a payload capacity of
    /// `capacity` bytes. Later attaches join the existing region and keep
    /// its capacity, whatever they request; writes that do not fit fail
    /// with [`StoreError::Capacity`].
    pub fn attach(name: &str, capacity: usize, config: &StoreConfig) -> Result<Self> {
        validate_channel_name(name)?;

        let attach_err = |reason: String| StoreError::Attach {
            name: name.to_string(),
            reason,
        };

        std::fs::create_dir_all(&config.directory).map_err(|e| {
            attach_err(format!(
                "cannot create directory {}: {e}",
                config.directory.display()
            ))
        })?;

        let path = config.region_path(name);
        let mut lock = ChannelLock::open(name, config)?;
        let (map, header) = lock.hold(config, || Self::map_region(name, capacity, &path))??;

        debug!("Attached to channel {} ({})", name, path.display());

        Ok(Self {
            name: name.to_string(),
            path,
            config: config.clone(),
            capacity: header.capacity as usize,
            region: Mutex::new(Region { map, lock }),
        })
    }

    /// Open, size and map the region file. Runs under the channel lock.
    fn map_region(name: &str, capacity: usize, path: &Path) -> Result<(MmapMut, RegionHeader)> {
        let attach_err = |reason: String| StoreError::Attach {
            name: name.to_string(),
            reason,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| attach_err(format!("cannot open {}: {e}", path.display())))?;

        let file_len = file
            .metadata()
            .map_err(|e| attach_err(format!("cannot stat {}: {e}", path.display())))?
            .len();

        let created = file_len == 0;
        if created {
            file.set_len(region_size(capacity) as u64)
                .map_err(|e| attach_err(format!("cannot size {}: {e}", path.display())))?;
        } else if file_len < HEADER_SIZE as u64 {
            return Err(attach_err(format!(
                "{} is {file_len} bytes, smaller than a region header",
                path.display()
            )));
        }

        // SAFETY: the mapping is only read or written while the channel lock
        // is held, and the file is never truncated while attached.
        #[allow(unsafe_code)]
        let mut map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| attach_err(format!("mmap failed for {}: {e}", path.display())))?;

        // A zeroed header means the creator died between sizing and
        // initializing the file; adopt the size it left behind.
        let uninitialized = !created && map[..HEADER_SIZE].iter().all(|&b| b == 0);
        let header = if created || uninitialized {
            let capacity = if created {
                capacity
            } else {
                map.len() - HEADER_SIZE
            };
            let header = RegionHeader::new(capacity as u64);
            header.to_mapped(&mut map[..]);
            info!(
                "Created channel {} with {} byte capacity at {}",
                name,
                capacity,
                path.display()
            );
            header
        } else {
            let header = RegionHeader::from_mapped(&map[..]).ok_or_else(|| {
                attach_err(format!("{} is not a shared region", path.display()))
            })?;
            if !header.is_consistent(map.len()) {
                return Err(StoreError::Corruption(format!(
                    "{}: header capacity {} does not fit {} mapped bytes",
                    path.display(),
                    header.capacity,
                    map.len()
                )));
            }
            if header.capacity != capacity as u64 {
                debug!(
                    "Channel {} exists with capacity {} (requested {})",
                    name, header.capacity, capacity
                );
            }
            header
        };

        Ok((map, header))
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload capacity in bytes.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configuration this handle attached with.
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.read(|entries| entries.get(key).cloned())
    }

    /// Get the value stored under `key`, or `default` if absent.
    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Get and deserialize the value stored under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Insert or replace the value under `key`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.update(|entries| {
            entries.insert(key.to_string(), value);
            Ok::<_, StoreError>(())
        })
    }

    /// Remove `key`.
    ///
    /// Removing an absent key is a no-op and returns `false`.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.update(|entries| Ok::<_, StoreError>(entries.remove(key).is_some()))
    }

    /// Check whether `key` is present.
    pub fn contains(&self, key: &str) -> Result<bool> {
        self.read(|entries| entries.contains_key(key))
    }

    /// All keys, in sorted order.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.read(|entries| entries.keys().cloned().collect())
    }

    /// Copy of the whole key space.
    pub fn snapshot(&self) -> Result<Entries> {
        self.read(Entries::clone)
    }

    /// Remove every key.
    pub fn clear(&self) -> Result<()> {
        self.update(|entries| {
            entries.clear();
            Ok::<_, StoreError>(())
        })
    }

    /// Number of committed writes since the region was created.
    pub fn generation(&self) -> Result<u64> {
        self.with_region(|map| Ok(Self::header(map)?.generation))
    }

    /// Run a read-modify-write transaction over the whole key space.
    ///
    /// `f` runs while the channel lock is held. If it returns `Ok` and the
    /// entries changed, they are written back before the lock is released.
    /// If it returns `Err`, nothing is written.
    pub fn update<R, E>(
        &self,
        f: impl FnOnce(&mut Entries) -> std::result::Result<R, E>,
    ) -> std::result::Result<R, E>
    where
        E: From<StoreError>,
    {
        let mut region = self.region.lock();
        let Region { map, lock } = &mut *region;

        lock.hold(&self.config, || -> std::result::Result<R, E> {
            let mut header = Self::header(map)?;
            let before = Self::decode(&self.path, map, &header)?;
            let mut entries = before.clone();

            let out = f(&mut entries)?;

            if entries != before {
                self.encode(map, &mut header, &entries)?;
            }
            Ok(out)
        })?
    }

    /// Replace `key` only if its current value equals `expected`.
    ///
    /// `None` as `expected` means "absent"; `None` as `new` removes the key.
    /// Returns whether the swap happened.
    pub fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Option<Value>,
    ) -> Result<bool> {
        self.update(|entries| {
            if entries.get(key) != expected {
                return Ok::<_, StoreError>(false);
            }
            match new {
                Some(value) => entries.insert(key.to_string(), value),
                None => entries.remove(key),
            };
            Ok(true)
        })
    }

    /// Release this handle. The region stays in place for other handles.
    pub fn detach(self) {
        drop(self);
    }

    /// Detach and remove the region from the host.
    ///
    /// Handles still attached elsewhere keep their mapping of the removed
    /// region; new attaches create a fresh one.
    pub fn destroy(self) -> Result<bool> {
        let name = self.name.clone();
        let config = self.config.clone();
        drop(self);
        Self::remove(&name, &config)
    }

    /// Remove the region `name` under `config.directory`.
    ///
    /// Returns `false` if no such region existed.
    pub fn remove(name: &str, config: &StoreConfig) -> Result<bool> {
        validate_channel_name(name)?;
        let path = config.region_path(name);
        if !path.exists() {
            return Ok(false);
        }

        let mut lock = ChannelLock::open(name, config)?;
        lock.hold(config, || match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed channel {}", name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        })?
    }

    fn read<R>(&self, f: impl FnOnce(&Entries) -> R) -> Result<R> {
        self.with_region(|map| {
            let header = Self::header(map)?;
            let entries = Self::decode(&self.path, map, &header)?;
            Ok(f(&entries))
        })
    }

    fn with_region<R>(&self, f: impl FnOnce(&MmapMut) -> Result<R>) -> Result<R> {
        let mut region = self.region.lock();
        let Region { map, lock } = &mut *region;
        lock.hold(&self.config, || f(map))?
    }

    fn header(map: &MmapMut) -> Result<RegionHeader> {
        let header = RegionHeader::from_mapped(&map[..])
            .ok_or_else(|| StoreError::Corruption("region header is unreadable".to_string()))?;
        if !header.is_consistent(map.len()) {
            return Err(StoreError::Corruption(format!(
                "payload length {} exceeds capacity {}",
                header.payload_len, header.capacity
            )));
        }
        Ok(header)
    }

    fn decode(path: &Path, map: &MmapMut, header: &RegionHeader) -> Result<Entries> {
        if header.payload_len == 0 {
            return Ok(Entries::new());
        }
        let payload = &map[HEADER_SIZE..HEADER_SIZE + header.payload_len as usize];
        serde_json::from_slice(payload).map_err(|e| {
            StoreError::Corruption(format!("{}: undecodable payload: {e}", path.display()))
        })
    }

    fn encode(
        &self,
        map: &mut MmapMut,
        header: &mut RegionHeader,
        entries: &Entries,
    ) -> Result<()> {
        let payload = if entries.is_empty() {
            Vec::new()
        } else {
            serde_json::to_vec(entries)?
        };

        if payload.len() > self.capacity {
            return Err(StoreError::Capacity {
                name: self.name.clone(),
                required: payload.len(),
                capacity: self.capacity,
            });
        }

        map[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(&payload);
        header.payload_len = payload.len() as u64;
        header.generation = header.generation.wrapping_add(1);
        header.to_mapped(&mut map[..]);

        debug!(
            "Committed {} keys ({} bytes) to channel {} at generation {}",
            entries.len(),
            payload.len(),
            self.name,
            header.generation
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config(dir: &Path) -> StoreConfig {
        StoreConfig::new(dir).with_lock_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_attach_creates_region() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());

        let store = SharedStore::attach("chan", 256, &config).expect("attach");
        assert_eq!(store.name(), "chan");
        assert_eq!(store.capacity(), 256);
        assert_eq!(store.path(), config.region_path("chan"));

        let len = std::fs::metadata(store.path()).expect("stat").len();
        assert_eq!(len, (HEADER_SIZE + 256) as u64);

        assert!(store.keys().expect("keys").is_empty());
        assert_eq!(store.generation().expect("generation"), 0);
        // Attach must not leave the lock held.
        let mut lock = ChannelLock::open("chan", &config).expect("open");
        assert!(lock.hold(&config, || ()).is_ok());
    }

    #[test]
    fn test_second_attach_joins_region() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());

        let a = SharedStore::attach("chan", 512, &config).expect("a");
        let b = SharedStore::attach("chan", 64, &config).expect("b");

        // Existing capacity wins over the requested one.
        assert_eq!(b.capacity(), 512);

        a.set("token", "aaa.bbb.ccc").expect("set");
        assert_eq!(b.get("token").expect("get"), Some(json!("aaa.bbb.ccc")));

        b.set("timeout", &3600).expect("set");
        assert_eq!(a.get_as::<u64>("timeout").expect("get"), Some(3600));
    }

    #[test]
    fn test_get_missing_vs_null() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SharedStore::attach("chan", 256, &test_config(dir.path())).expect("attach");

        store.set("nothing", &Value::Null).expect("set");
        assert_eq!(store.get("nothing").expect("get"), Some(Value::Null));
        assert_eq!(store.get("absent").expect("get"), None);
        assert_eq!(store.get_or("absent", json!([])).expect("get_or"), json!([]));
    }

    #[test]
    fn test_delete_and_contains() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SharedStore::attach("chan", 256, &test_config(dir.path())).expect("attach");

        store.set("k", &1).expect("set");
        assert!(store.contains("k").expect("contains"));
        assert!(store.delete("k").expect("delete"));
        assert!(!store.contains("k").expect("contains"));
        // Absent key is a no-op.
        assert!(!store.delete("k").expect("delete"));
    }

    #[test]
    fn test_capacity_error_leaves_region_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SharedStore::attach("chan", 32, &test_config(dir.path())).expect("attach");

        store.set("a", &1).expect("small value fits");
        let generation = store.generation().expect("generation");

        let result = store.set("big", &"x".repeat(64));
        match result {
            Err(StoreError::Capacity {
                required, capacity, ..
            }) => {
                assert!(required > 32);
                assert_eq!(capacity, 32);
            }
            other => panic!("expected capacity error, got {other:?}"),
        }

        assert_eq!(store.generation().expect("generation"), generation);
        assert_eq!(store.keys().expect("keys"), vec!["a".to_string()]);
    }

    #[test]
    fn test_update_skips_write_when_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SharedStore::attach("chan", 256, &test_config(dir.path())).expect("attach");

        store.set("k", &1).expect("set");
        assert_eq!(store.generation().expect("generation"), 1);

        let seen = store
            .update(|entries| Ok::<_, StoreError>(entries.len()))
            .expect("update");
        assert_eq!(seen, 1);
        assert_eq!(store.generation().expect("generation"), 1);

        // Writing the same value again is also a no-op.
        store.set("k", &1).expect("set");
        assert_eq!(store.generation().expect("generation"), 1);
    }

    #[test]
    fn test_update_error_discards_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SharedStore::attach("chan", 256, &test_config(dir.path())).expect("attach");

        let result = store.update(|entries| {
            entries.insert("k".to_string(), json!(1));
            Err::<(), _>(StoreError::Corruption("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(!store.contains("k").expect("contains"));
    }

    #[test]
    fn test_compare_and_swap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SharedStore::attach("chan", 256, &test_config(dir.path())).expect("attach");

        assert!(store.compare_and_swap("k", None, Some(json!(1))).expect("cas"));
        assert!(!store.compare_and_swap("k", None, Some(json!(2))).expect("cas"));
        assert!(
            store
                .compare_and_swap("k", Some(&json!(1)), Some(json!(2)))
                .expect("cas")
        );
        assert_eq!(store.get("k").expect("get"), Some(json!(2)));
        assert!(store.compare_and_swap("k", Some(&json!(2)), None).expect("cas"));
        assert!(!store.contains("k").expect("contains"));
    }

    #[test]
    fn test_clear_and_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SharedStore::attach("chan", 256, &test_config(dir.path())).expect("attach");

        store.set("b", &2).expect("set");
        store.set("a", &1).expect("set");
        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(
            snapshot.into_iter().collect::<Vec<_>>(),
            vec![("a".to_string(), json!(1)), ("b".to_string(), json!(2))]
        );

        store.clear().expect("clear");
        assert!(store.snapshot().expect("snapshot").is_empty());
    }

    #[test]
    fn test_region_persists_after_detach() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());

        let store = SharedStore::attach("chan", 256, &config).expect("attach");
        store.set("k", "v").expect("set");
        store.detach();

        let again = SharedStore::attach("chan", 256, &config).expect("attach");
        assert_eq!(again.get("k").expect("get"), Some(json!("v")));
    }

    #[test]
    fn test_destroy_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());

        let store = SharedStore::attach("chan", 256, &config).expect("attach");
        store.set("k", "v").expect("set");
        let path = store.path().to_path_buf();
        assert!(store.destroy().expect("destroy"));
        assert!(!path.exists());
        assert!(!SharedStore::remove("chan", &config).expect("remove"));

        let fresh = SharedStore::attach("chan", 256, &config).expect("attach");
        assert!(!fresh.contains("k").expect("contains"));
    }

    #[test]
    fn test_attach_rejects_foreign_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        std::fs::write(config.region_path("chan"), vec![0xFFu8; 128]).expect("write");

        let result = SharedStore::attach("chan", 256, &config);
        assert!(matches!(result, Err(StoreError::Attach { .. })));
    }

    #[test]
    fn test_attach_rejects_oversized_capacity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());

        let mut data = vec![0u8; HEADER_SIZE + 64];
        RegionHeader {
            payload_len: 100,
            ..RegionHeader::new(u64::MAX)
        }
        .to_mapped(&mut data);
        std::fs::write(config.region_path("chan"), data).expect("write");

        let result = SharedStore::attach("chan", 64, &config);
        assert!(matches!(result, Err(StoreError::Corruption(_))));
    }

    #[test]
    fn test_attach_adopts_zeroed_region() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        std::fs::write(config.region_path("chan"), vec![0u8; HEADER_SIZE + 100]).expect("write");

        let store = SharedStore::attach("chan", 256, &config).expect("attach");
        assert_eq!(store.capacity(), 100);
        store.set("k", &1).expect("set");
        assert_eq!(store.get_as::<u64>("k").expect("get"), Some(1));
    }

    #[test]
    fn test_attach_rejects_invalid_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = SharedStore::attach("../chan", 256, &test_config(dir.path()));
        assert!(matches!(result, Err(StoreError::InvalidName(_))));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(test_config(dir.path()));
        drop(SharedStore::attach("counter", 256, &config).expect("attach"));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let config = Arc::clone(&config);
                std::thread::spawn(move || {
                    // Separate handle per thread, as separate processes would have.
                    let store = SharedStore::attach("counter", 256, &config).expect("attach");
                    for _ in 0..25 {
                        store
                            .update(|entries| {
                                let n = entries.get("n").and_then(Value::as_u64).unwrap_or(0);
                                entries.insert("n".to_string(), json!(n + 1));
                                Ok::<_, StoreError>(())
                            })
                            .expect("update");
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("join");
        }

        let store = SharedStore::attach("counter", 256, &config).expect("attach");
        assert_eq!(store.get_as::<u64>("n").expect("get"), Some(100));
    }

    #[test]
    fn test_slow_transactions_stay_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(test_config(dir.path()).with_lock_retry(Duration::from_millis(5)));
        drop(SharedStore::attach("counter", 256, &config).expect("attach"));

        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..2)
            .map(|_| {
                let config = Arc::clone(&config);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                std::thread::spawn(move || {
                    let store = SharedStore::attach("counter", 256, &config).expect("attach");
                    store
                        .update(|entries| {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            let n = entries.get("n").and_then(Value::as_u64).unwrap_or(0);
                            std::thread::sleep(Duration::from_millis(500));
                            entries.insert("n".to_string(), json!(n + 1));
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, StoreError>(())
                        })
                        .expect("update");
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("join");
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        let store = SharedStore::attach("counter", 256, &config).expect("attach");
        assert_eq!(store.get_as::<u64>("n").expect("get"), Some(2));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_store_matches_model(ops in proptest::collection::vec(
            (proptest::option::of(0i64..100), "[a-d]"),
            1..40,
        )) {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = SharedStore::attach("model", 4096, &test_config(dir.path())).expect("attach");
            let mut model = Entries::new();

            for (value, key) in ops {
                match value {
                    Some(v) => {
                        store.set(&key, &v).expect("set");
                        model.insert(key, json!(v));
                    }
                    None => {
                        let removed = store.delete(&key).expect("delete");
                        prop_assert_eq!(removed, model.remove(&key).is_some());
                    }
                }
            }

            prop_assert_eq!(store.snapshot().expect("snapshot"), model);
        }
    }
}
