//! Persistent per-configuration usage counters.
//!
//! Counters live in `<configs_root>/<config_id>/counters.json`. Every
//! mutation is written through to disk before the call returns, by writing a
//! temporary file in the same directory and renaming it over the old one.
//!
//! Read-modify-write sequences run under an advisory lock on
//! `counters.lock` and then the store's mutex, so neither threads of this
//! process nor other engine instances sharing the directory can lose an
//! update. Every acquisition opens its own handle, so the advisory lock also
//! excludes threads of the same process.
//!
//! Quota-gated operations use a [`QuotaReservation`]: the limit check takes
//! the lock and the lock is held until the increment is committed or the
//! reservation is dropped, so at most `max` operations are ever granted.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::audit::AuditTrail;
use crate::error::{Error, Result};

/// File name of the counters document inside a configuration directory.
pub const COUNTERS_FILE: &str = "counters.json";
const LOCK_FILE: &str = "counters.lock";

/// Usage counters of one configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    /// Successful log reads
    pub log_access_count: u64,
    /// Successful artifact reads
    pub output_access_count: u64,
}

#[derive(Debug, Clone, Copy)]
enum CounterField {
    LogAccess,
    OutputAccess,
}

impl CounterField {
    fn label(self) -> &'static str {
        match self {
            CounterField::LogAccess => "LogAccessCount",
            CounterField::OutputAccess => "OutputAccessCount",
        }
    }

    fn slot(self, counters: &mut Counters) -> &mut u64 {
        match self {
            CounterField::LogAccess => &mut counters.log_access_count,
            CounterField::OutputAccess => &mut counters.output_access_count,
        }
    }

    fn value(self, counters: &Counters) -> u64 {
        match self {
            CounterField::LogAccess => counters.log_access_count,
            CounterField::OutputAccess => counters.output_access_count,
        }
    }
}

/// Store of usage counters with a write-through cache.
#[derive(Debug)]
pub struct CounterStore {
    configs_root: PathBuf,
    cache: Mutex<HashMap<String, Counters>>,
    audit: Arc<AuditTrail>,
}

impl CounterStore {
    /// Creates a store rooted at the configurations directory.
    ///
    /// Increments are recorded on `audit`.
    pub fn new(configs_root: impl Into<PathBuf>, audit: Arc<AuditTrail>) -> Self {
        Self {
            configs_root: configs_root.into(),
            cache: Mutex::new(HashMap::new()),
            audit,
        }
    }

    /// Path of the counters document of a configuration.
    pub fn path(&self, config_id: &str) -> PathBuf {
        self.configs_root.join(config_id).join(COUNTERS_FILE)
    }

    /// Reads durable counters into the cache and returns them.
    pub fn load_counters(&self, config_id: &str) -> Result<Counters> {
        let mut cache = self.lock_cache();
        self.reload_locked(&mut cache, config_id)
    }

    /// Persists the cached counters of a configuration.
    pub fn save_counters(&self, config_id: &str) -> Result<()> {
        let cache = self.lock_cache();
        let counters = cache.get(config_id).copied().ok_or_else(|| {
            Error::CounterIo(format!("no counters loaded for {}", config_id))
        })?;
        write_atomically(&self.path(config_id), &counters)
    }

    /// Returns the cached counters without touching disk.
    pub fn cached(&self, config_id: &str) -> Option<Counters> {
        self.lock_cache().get(config_id).copied()
    }

    /// Adds one log access and returns the new count.
    pub fn increment_log_access(&self, config_id: &str) -> Result<u64> {
        self.increment(config_id, CounterField::LogAccess)
    }

    /// Adds one output access and returns the new count.
    pub fn increment_output_access(&self, config_id: &str) -> Result<u64> {
        self.increment(config_id, CounterField::OutputAccess)
    }

    /// Returns true while the durable log access count is below `max`.
    ///
    /// Always reloads from disk first: another instance may have advanced the
    /// counter since it was cached.
    pub fn check_log_access_limit(&self, config_id: &str, max: u64) -> Result<bool> {
        self.check_limit(config_id, CounterField::LogAccess, max)
    }

    /// Returns true while the durable output access count is below `max`.
    ///
    /// Always reloads from disk first.
    pub fn check_output_access_limit(&self, config_id: &str, max: u64) -> Result<bool> {
        self.check_limit(config_id, CounterField::OutputAccess, max)
    }

    /// Claims a log access slot if the durable count is below `max`.
    ///
    /// Returns `None` when the quota is exhausted. The slot holds the counter
    /// lock until it is committed or dropped; dropping it charges nothing.
    pub fn reserve_log_access(&self, config_id: &str, max: u64) -> Result<Option<QuotaReservation<'_>>> {
        self.reserve(config_id, CounterField::LogAccess, max)
    }

    /// Claims an output access slot if the durable count is below `max`.
    ///
    /// Same contract as [`CounterStore::reserve_log_access`].
    pub fn reserve_output_access(&self, config_id: &str, max: u64) -> Result<Option<QuotaReservation<'_>>> {
        self.reserve(config_id, CounterField::OutputAccess, max)
    }

    fn reserve(&self, config_id: &str, field: CounterField, max: u64) -> Result<Option<QuotaReservation<'_>>> {
        let file_lock = self.lock_file(config_id)?;
        let counters = {
            let mut cache = self.lock_cache();
            self.reload_locked(&mut cache, config_id)?
        };
        let current = field.value(&counters);
        if current >= max {
            return Ok(None);
        }
        Ok(Some(QuotaReservation {
            store: self,
            config_id: config_id.to_string(),
            field,
            current,
            _file_lock: file_lock,
        }))
    }

    fn check_limit(&self, config_id: &str, field: CounterField, max: u64) -> Result<bool> {
        let mut cache = self.lock_cache();
        let counters = self.reload_locked(&mut cache, config_id)?;
        Ok(field.value(&counters) < max)
    }

    fn increment(&self, config_id: &str, field: CounterField) -> Result<u64> {
        let _file_lock = self.lock_file(config_id)?;
        self.increment_locked(config_id, field)
    }

    /// Caller must hold the file lock of `config_id`.
    fn increment_locked(&self, config_id: &str, field: CounterField) -> Result<u64> {
        let mut cache = self.lock_cache();

        // Reload under the file lock so an out-of-band increment is never overwritten.
        let mut counters = self.reload_locked(&mut cache, config_id)?;
        let slot = field.slot(&mut counters);
        *slot = slot
            .checked_add(1)
            .ok_or_else(|| Error::CounterIo(format!("{} overflow", field.label())))?;
        let value = *slot;

        write_atomically(&self.path(config_id), &counters)?;
        cache.insert(config_id.to_string(), counters);

        // Persisted first, audited second.
        if let Err(e) = self
            .audit
            .write_audit_log(config_id, format!("Increment {}: {}", field.label(), value))
        {
            tracing::warn!(config_id, error = %e, "counter increment not audited");
        }
        tracing::debug!(config_id, counter = field.label(), value, "counter incremented");
        Ok(value)
    }

    fn reload_locked(
        &self,
        cache: &mut MutexGuard<'_, HashMap<String, Counters>>,
        config_id: &str,
    ) -> Result<Counters> {
        let counters = read_counters(&self.path(config_id))?;
        cache.insert(config_id.to_string(), counters);
        Ok(counters)
    }

    fn lock_file(&self, config_id: &str) -> Result<File> {
        let path = self.configs_root.join(config_id).join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::CounterIo(format!("cannot open {}: {}", path.display(), e)))?;
        FileExt::lock_exclusive(&file)
            .map_err(|e| Error::CounterIo(format!("cannot lock {}: {}", path.display(), e)))?;
        Ok(file)
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, Counters>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A claimed quota slot of one configuration.
///
/// Holds the configuration's counter lock. [`QuotaReservation::commit`]
/// charges the slot; dropping the reservation releases it uncharged.
#[derive(Debug)]
#[must_use = "a reservation charges nothing until committed"]
pub struct QuotaReservation<'a> {
    store: &'a CounterStore,
    config_id: String,
    field: CounterField,
    current: u64,
    _file_lock: File,
}

impl QuotaReservation<'_> {
    /// Durable count observed when the slot was claimed.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Increments the counter, persists and audits it, then releases the lock.
    pub fn commit(self) -> Result<u64> {
        self.store.increment_locked(&self.config_id, self.field)
    }
}

fn read_counters(path: &Path) -> Result<Counters> {
    let raw = std::fs::read(path)
        .map_err(|e| Error::CounterIo(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| Error::CounterIo(format!("cannot parse {}: {}", path.display(), e)))
}

/// Writes counters to a temporary file next to `path`, syncs it, and renames
/// it over `path`. Readers observe either the old or the new document.
fn write_atomically(path: &Path, counters: &Counters) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::CounterIo(format!("{} has no parent", path.display())))?;
    let bytes = serde_json::to_vec_pretty(counters)
        .map_err(|e| Error::CounterIo(format!("cannot serialize counters: {}", e)))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::CounterIo(format!("cannot create temp file in {}: {}", dir.display(), e)))?;
    temp.write_all(&bytes)
        .map_err(|e| Error::CounterIo(format!("cannot write temp file: {}", e)))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::CounterIo(format!("cannot sync temp file: {}", e)))?;
    temp.persist(path)
        .map_err(|e| Error::CounterIo(format!("cannot replace {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(initial: Counters) -> (tempfile::TempDir, CounterStore) {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("cfg");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join(COUNTERS_FILE), serde_json::to_vec(&initial).unwrap()).unwrap();
        let audit = Arc::new(AuditTrail::new(root.path()));
        let store = CounterStore::new(root.path(), audit);
        (root, store)
    }

    #[test]
    fn load_reads_camel_case_document() {
        let (root, store) = store_with(Counters::default());
        std::fs::write(
            root.path().join("cfg").join(COUNTERS_FILE),
            r#"{"logAccessCount": 4, "outputAccessCount": 1}"#,
        )
        .unwrap();
        let counters = store.load_counters("cfg").unwrap();
        assert_eq!(counters.log_access_count, 4);
        assert_eq!(store.cached("cfg"), Some(counters));
    }

    #[test]
    fn increment_persists_then_audits() {
        let (root, store) = store_with(Counters {
            log_access_count: 2,
            output_access_count: 0,
        });
        assert_eq!(store.increment_log_access("cfg").unwrap(), 3);
        assert_eq!(store.increment_output_access("cfg").unwrap(), 1);

        let on_disk = read_counters(&store.path("cfg")).unwrap();
        assert_eq!(on_disk.log_access_count, 3);
        assert_eq!(on_disk.output_access_count, 1);

        let audit = std::fs::read_to_string(root.path().join("cfg").join("audit.txt")).unwrap();
        assert!(audit.contains("Increment LogAccessCount: 3"));
        assert!(audit.contains("Increment OutputAccessCount: 1"));
    }

    #[test]
    fn limit_check_sees_out_of_band_update() {
        let (_root, store) = store_with(Counters::default());
        store.load_counters("cfg").unwrap();
        assert!(store.check_log_access_limit("cfg", 1).unwrap());

        // Another instance bumps the durable counter.
        std::fs::write(
            store.path("cfg"),
            r#"{"logAccessCount": 1, "outputAccessCount": 0}"#,
        )
        .unwrap();
        assert!(!store.check_log_access_limit("cfg", 1).unwrap());
        assert!(store.check_output_access_limit("cfg", 1).unwrap());
    }

    #[test]
    fn increment_builds_on_out_of_band_update() {
        let (_root, store) = store_with(Counters::default());
        store.increment_log_access("cfg").unwrap();
        std::fs::write(
            store.path("cfg"),
            r#"{"logAccessCount": 10, "outputAccessCount": 0}"#,
        )
        .unwrap();
        assert_eq!(store.increment_log_access("cfg").unwrap(), 11);
    }

    #[test]
    fn missing_or_corrupt_counters_fail() {
        let (_root, store) = store_with(Counters::default());
        assert!(matches!(store.load_counters("other"), Err(Error::CounterIo(_))));
        std::fs::write(store.path("cfg"), "{").unwrap();
        assert!(matches!(store.increment_log_access("cfg"), Err(Error::CounterIo(_))));
        assert!(matches!(store.check_log_access_limit("cfg", 5), Err(Error::CounterIo(_))));
    }

    #[test]
    fn save_requires_loaded_slot() {
        let (_root, store) = store_with(Counters::default());
        assert!(store.save_counters("cfg").is_err());
        store.load_counters("cfg").unwrap();
        assert!(store.save_counters("cfg").is_ok());
    }

    #[test]
    fn dropped_reservation_charges_nothing() {
        let (_root, store) = store_with(Counters::default());
        let slot = store.reserve_log_access("cfg", 1).unwrap().unwrap();
        assert_eq!(slot.current(), 0);
        drop(slot);
        assert_eq!(store.load_counters("cfg").unwrap().log_access_count, 0);

        let slot = store.reserve_log_access("cfg", 1).unwrap().unwrap();
        assert_eq!(slot.commit().unwrap(), 1);
        assert!(store.reserve_log_access("cfg", 1).unwrap().is_none());
        assert!(store.reserve_output_access("cfg", 1).unwrap().is_some());
    }

    #[test]
    fn concurrent_reservations_never_exceed_max() {
        let (_root, store) = store_with(Counters::default());
        let store = Arc::new(store);
        let barrier = Arc::new(std::sync::Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    match store.reserve_output_access("cfg", 3).unwrap() {
                        Some(slot) => {
                            slot.commit().unwrap();
                            true
                        }
                        None => false,
                    }
                })
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 3);
        assert_eq!(store.load_counters("cfg").unwrap().output_access_count, 3);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let (_root, store) = store_with(Counters {
            log_access_count: 5,
            output_access_count: 0,
        });
        let store = Arc::new(store);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.increment_log_access("cfg").unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load_counters("cfg").unwrap().log_access_count, 21);
    }
}
