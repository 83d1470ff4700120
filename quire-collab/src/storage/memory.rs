//! Process-local storage. Used by tests and the play binary when no
//! database path is given.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{PersistedRecord, Storage, StoreError};

#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<BTreeMap<String, PersistedRecord>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail, simulating an outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory storage offline".into()));
        }
        Ok(())
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, PersistedRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::DatabaseError("record map poisoned".into()))
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<PersistedRecord>, StoreError> {
        self.check()?;
        Ok(self.records()?.get(key).cloned())
    }

    fn put(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records()?
            .insert(record.doc_name.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.records()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self.records()?.keys().cloned().collect())
    }
}
