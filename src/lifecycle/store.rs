//! Module lifecycle store
//!
//! The store is the single source of truth for resumable upgrade progress.
//! The orchestrator reads it fresh on every bootstrap and writes a record after
//! every script, so a crash loses at most one script's progress.

use crate::error::StoreError;
use crate::lifecycle::ModuleRecord;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Persistence for [`ModuleRecord`]s
pub trait ModuleStore: Send + Sync {
    /// Whether the backing table exists yet
    ///
    /// On a fresh install it does not, and every module is a new install.
    fn exists(&self) -> Result<bool, StoreError>;

    /// Case-insensitive lookup
    fn get(&self, name: &str) -> Result<Option<ModuleRecord>, StoreError>;

    /// Every record, sorted by name
    fn all(&self) -> Result<Vec<ModuleRecord>, StoreError>;

    /// Insert or update a record
    ///
    /// `original_version` is written on insert only.
    fn upsert(&self, record: &ModuleRecord) -> Result<(), StoreError>;

    /// Delete a record; deleting a missing record is not an error
    fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Store held in memory
///
/// Used by tests and by embedders that keep lifecycle state elsewhere.
#[derive(Debug, Default)]
pub struct MemoryModuleStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    created: bool,
    records: BTreeMap<String, ModuleRecord>,
}

impl MemoryModuleStore {
    /// An existing, empty store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                created: true,
                records: BTreeMap::new(),
            }),
        }
    }

    /// A store whose table has not been created; the first upsert creates it
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// An existing store seeded with `records`
    pub fn with_records(records: impl IntoIterator<Item = ModuleRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            for mut record in records {
                record.new_install = false;
                inner.records.insert(record.name.to_lowercase(), record);
            }
        }
        store
    }
}

impl ModuleStore for MemoryModuleStore {
    fn exists(&self) -> Result<bool, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.created)
    }

    fn get(&self, name: &str) -> Result<Option<ModuleRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.records.get(&name.to_lowercase()).map(|r| {
            let mut r = r.clone();
            r.new_install = false;
            r
        }))
    }

    fn all(&self) -> Result<Vec<ModuleRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .records
            .values()
            .cloned()
            .map(|mut r| {
                r.new_install = false;
                r
            })
            .collect())
    }

    fn upsert(&self, record: &ModuleRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.created = true;
        let key = record.name.to_lowercase();
        let mut stored = record.clone();
        if let Some(existing) = inner.records.get(&key) {
            stored.original_version = existing.original_version;
        }
        stored.new_install = false;
        inner.records.insert(key, stored);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.records.remove(&name.to_lowercase());
        Ok(())
    }
}
