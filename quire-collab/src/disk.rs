//! Debounced document persistence.
//!
//! ```text
//! update_doc(k, latest) ──► pending[k] exists? ── yes ──► refresh getter, keep timer
//!                                 │ no
//!                                 ▼
//!                       spawn timer(debounce) ──► fire: latest() ──► Storage::put
//! flush_doc(k, doc)     ──► abort timer, put(doc) now
//! flush_all()           ──► abort every timer, put(latest()) for each
//! ```
//!
//! The getter runs when the timer fires, not when the write is scheduled,
//! so a flush always stores the newest content.
//!
//! Writes for one key are serialized by a per-key lock. A timer checks its
//! ticket under that lock, so it never lands after an explicit flush.
//!
//! `created` timestamps are remembered in a bounded LRU cache. A key that
//! was evicted gets "now" on its next write.

use async_trait::async_trait;
use log::{debug, error, trace};
use lru::LruCache;
use quire_core::Document;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

use crate::lock;
use crate::storage::{PersistedRecord, Storage, StoreError, STORAGE_SCHEMA_VERSION};

/// Produces the document to persist at flush time.
pub type LatestDoc<D> = Arc<dyn Fn() -> D + Send + Sync>;

/// Disk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiskConfig {
    /// Quiet period before a scheduled write runs (default: 2000ms)
    pub debounce_ms: u64,
    /// Entries kept in the created-timestamp cache (default: 100)
    pub created_cache_size: usize,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            created_cache_size: 100,
        }
    }
}

impl DiskConfig {
    /// Short debounce for tests.
    pub fn for_testing() -> Self {
        Self {
            debounce_ms: 50,
            created_cache_size: 8,
        }
    }
}

/// Versioned document store used by the manager.
#[async_trait]
pub trait Disk<D: Document>: Send + Sync {
    /// Current stored document, or the default document if none exists.
    fn get_doc(&self, key: &str) -> Result<D, StoreError>;

    /// Schedule a debounced write. Coalesces with a pending write for `key`.
    fn update_doc(&self, key: &str, latest: LatestDoc<D>);

    /// Cancel any pending write for `key` and store `doc` now.
    fn flush_doc(&self, key: &str, doc: &D) -> Result<(), StoreError>;

    /// Run every pending write now. Returns how many were written.
    async fn flush_all(&self) -> Result<usize, StoreError>;
}

struct PendingWrite<D> {
    ticket: u64,
    latest: LatestDoc<D>,
    timer: JoinHandle<()>,
}

struct DiskInner<D: Document> {
    storage: Arc<dyn Storage>,
    config: DiskConfig,
    default_doc: D,
    pending: Mutex<HashMap<String, PendingWrite<D>>>,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    created: Mutex<LruCache<String, u64>>,
    next_ticket: AtomicU64,
}

/// [`Disk`] over any [`Storage`] backend.
pub struct LocalDisk<D: Document> {
    inner: Arc<DiskInner<D>>,
}

impl<D: Document> Clone for LocalDisk<D> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl<D: Document> LocalDisk<D> {
    pub fn new(storage: Arc<dyn Storage>, config: DiskConfig, default_doc: D) -> Self {
        let capacity = NonZeroUsize::new(config.created_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(DiskInner {
                storage,
                config,
                default_doc,
                pending: Mutex::new(HashMap::new()),
                writers: Mutex::new(HashMap::new()),
                created: Mutex::new(LruCache::new(capacity)),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Number of scheduled, not yet written, updates.
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.inner.pending).contains_key(key)
    }

    pub fn created_cache_len(&self) -> usize {
        lock(&self.inner.created).len()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub fn config(&self) -> &DiskConfig {
        &self.inner.config
    }
}

impl<D: Document> DiskInner<D> {
    fn writer(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.writers).entry(key.to_string()).or_default())
    }

    /// Timer callback. Writes only if the pending entry is still ours.
    fn fire(&self, key: &str, ticket: u64) {
        let writer = self.writer(key);
        let _writing = lock(&writer);
        let latest = {
            let mut pending = lock(&self.pending);
            match pending.get(key) {
                Some(p) if p.ticket == ticket => pending.remove(key).map(|p| p.latest),
                _ => None,
            }
        };
        let Some(latest) = latest else {
            trace!("Timer for {key} superseded");
            return;
        };
        if let Err(e) = self.write(key, &latest()) {
            error!("Debounced write for {key} failed: {e}");
        }
    }

    fn write(&self, key: &str, doc: &D) -> Result<(), StoreError> {
        let now = now_ms();
        let created = {
            let mut cache = lock(&self.created);
            match cache.get(key) {
                Some(created) => *created,
                None => {
                    cache.put(key.to_string(), now);
                    now
                }
            }
        };
        let json = serde_json::to_string(doc)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let record = PersistedRecord {
            doc_name: key.to_string(),
            title: doc.title().unwrap_or_else(|| key.to_string()),
            doc: json,
            modified: now,
            created,
            version: STORAGE_SCHEMA_VERSION,
        };
        self.storage.put(&record)?;
        debug!("Persisted {key} ({} bytes)", record.doc.len());
        Ok(())
    }
}

#[async_trait]
impl<D: Document> Disk<D> for LocalDisk<D> {
    fn get_doc(&self, key: &str) -> Result<D, StoreError> {
        let Some(record) = self.inner.storage.get(key)? else {
            debug!("No stored record for {key}, using default document");
            return Ok(self.inner.default_doc.clone());
        };
        lock(&self.inner.created).put(key.to_string(), record.created);
        serde_json::from_str(&record.doc).map_err(|e| StoreError::DeserializationError(e.to_string()))
    }

    fn update_doc(&self, key: &str, latest: LatestDoc<D>) {
        let mut pending = lock(&self.inner.pending);
        if let Some(entry) = pending.get_mut(key) {
            trace!("Coalescing update for {key}");
            entry.latest = latest;
            return;
        }

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let delay = Duration::from_millis(self.inner.config.debounce_ms);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(&owned_key, ticket);
        });
        pending.insert(key.to_string(), PendingWrite { ticket, latest, timer });
    }

    fn flush_doc(&self, key: &str, doc: &D) -> Result<(), StoreError> {
        let writer = self.inner.writer(key);
        let _writing = lock(&writer);
        if let Some(p) = lock(&self.inner.pending).remove(key) {
            p.timer.abort();
        }
        self.inner.write(key, doc)
    }

    async fn flush_all(&self) -> Result<usize, StoreError> {
        let drained: Vec<(String, PendingWrite<D>)> = lock(&self.inner.pending).drain().collect();
        let mut written = 0;
        let mut first_error = None;
        for (key, p) in drained {
            p.timer.abort();
            let writer = self.inner.writer(&key);
            let _writing = lock(&writer);
            match self.inner.write(&key, &(p.latest)()) {
                Ok(()) => written += 1,
                Err(e) => {
                    error!("Flush of {key} failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        // Wait out timer writes that were already running.
        let writers: Vec<Arc<Mutex<()>>> = lock(&self.inner.writers).values().cloned().collect();
        for writer in writers {
            drop(lock(&writer));
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}
