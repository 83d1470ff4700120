//! Server-side authority for a set of documents.
//!
//! Architecture:
//! ```text
//! Request ──► Manager::handle ──► entries: RwLock<HashMap<docName, Arc<Entry>>>
//!                                        │
//!                                        ▼
//!                     Entry { instance: Mutex<Instance>, version: watch }
//!                        │            │                     │
//!                        │            │ push bumps version  │ long-polls wait
//!                        ▼            ▼                     ▼
//!                  canonical doc   step history        get_events waiters
//!                        │
//!                        └── Disk::update_doc (debounced, reads latest doc)
//! ```
//!
//! Each document is served by its own entry. The instance mutex is never
//! held across an await; long-polls wait on the entry's version channel.

use log::{debug, info, trace};
use quire_core::{ClientId, Document};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use crate::disk::Disk;
use crate::lock;
use crate::protocol::{
    CollabError, DocumentSnapshot, Events, GetDocument, GetEvents, PushEvents, Request, Response,
};
use crate::storage::StoreError;

/// Manager configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Steps retained per document for `get_events` (None = keep all)
    pub history_limit: Option<usize>,
    /// Long-poll hold time before an empty answer (None = hold until a push)
    pub poll_timeout_ms: Option<u64>,
}

impl ManagerConfig {
    /// Bounded history and short long-polls for tests.
    pub fn for_testing() -> Self {
        Self {
            history_limit: Some(64),
            poll_timeout_ms: Some(500),
        }
    }
}

/// Snapshot of one document's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub doc_name: String,
    pub version: u64,
    pub retained_steps: usize,
    pub users: Vec<String>,
}

struct Instance<D: Document> {
    doc: D,
    version: u64,
    /// The most recent steps, oldest first, each with its origin.
    history: VecDeque<(D::Step, ClientId)>,
    users: BTreeSet<String>,
}

impl<D: Document> Instance<D> {
    fn new(doc: D) -> Self {
        Self {
            doc,
            version: 0,
            history: VecDeque::new(),
            users: BTreeSet::new(),
        }
    }

    /// Oldest version `get_events` can still answer.
    fn history_start(&self) -> u64 {
        self.version - self.history.len() as u64
    }

    fn events_since(&self, version: u64) -> Events<D::Step> {
        let skip = (version - self.history_start()) as usize;
        let (steps, client_ids): (Vec<_>, Vec<_>) = self
            .history
            .iter()
            .skip(skip)
            .map(|(step, id)| (step.clone(), id.clone()))
            .unzip();
        Events { steps, client_ids }
    }

    fn info(&self, doc_name: &str) -> InstanceInfo {
        InstanceInfo {
            doc_name: doc_name.to_string(),
            version: self.version,
            retained_steps: self.history.len(),
            users: self.users.iter().cloned().collect(),
        }
    }
}

struct Entry<D: Document> {
    instance: Mutex<Instance<D>>,
    version_tx: watch::Sender<u64>,
}

/// Collaboration manager. One per process, shared behind an `Arc`.
pub struct Manager<D: Document> {
    config: ManagerConfig,
    disk: Arc<dyn Disk<D>>,
    entries: RwLock<HashMap<String, Arc<Entry<D>>>>,
}

impl<D: Document> Manager<D> {
    pub fn new(config: ManagerConfig, disk: Arc<dyn Disk<D>>) -> Self {
        Self {
            config,
            disk,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Dispatch one protocol request.
    pub async fn handle(&self, request: Request<D::Step>) -> Result<Response<D::Step>, CollabError> {
        trace!("{} {}", request.op(), request.doc_name());
        match request {
            Request::GetDocument(r) => self.get_document(r).await.map(Response::Document),
            Request::GetEvents(r) => self.get_events(r).await.map(Response::Events),
            Request::PushEvents(r) => self.push_events(r).await.map(|()| Response::Pushed {}),
        }
    }

    /// Current document and version, loading it on first access.
    pub async fn get_document(&self, req: GetDocument) -> Result<DocumentSnapshot, CollabError> {
        let entry = self.entry(&req.doc_name).await?;
        let mut inst = lock(&entry.instance);
        inst.users.insert(req.user_id);
        let doc = serde_json::to_value(&inst.doc).map_err(|e| CollabError::server(e.to_string()))?;
        Ok(DocumentSnapshot {
            doc,
            version: inst.version,
        })
    }

    /// Steps after `version`. Holds the request while `version` is current.
    pub async fn get_events(&self, req: GetEvents) -> Result<Events<D::Step>, CollabError> {
        let entry = self.entry(&req.doc_name).await?;
        // Subscribe before checking so a push in between is not missed.
        let mut version_rx = entry.version_tx.subscribe();
        {
            let mut inst = lock(&entry.instance);
            inst.users.insert(req.user_id);
            if let Some(events) = Self::answer(&inst, req.version)? {
                return Ok(events);
            }
        }

        debug!("Holding poll for {} at version {}", req.doc_name, req.version);
        let changed = version_rx.wait_for(|v| *v > req.version);
        match self.config.poll_timeout_ms {
            None => {
                changed.await.map_err(|e| CollabError::server(e.to_string()))?;
            }
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), changed).await {
                Ok(result) => {
                    result.map_err(|e| CollabError::server(e.to_string()))?;
                }
                Err(_) => {
                    trace!("Poll for {} timed out", req.doc_name);
                    return Ok(Events::empty());
                }
            },
        }

        let inst = lock(&entry.instance);
        Ok(Self::answer(&inst, req.version)?.unwrap_or_else(Events::empty))
    }

    /// `None` when `version` is current and the caller has to wait.
    fn answer(inst: &Instance<D>, version: u64) -> Result<Option<Events<D::Step>>, CollabError> {
        if version > inst.version {
            return Err(CollabError::invalid_version(version));
        }
        if version < inst.history_start() {
            return Err(CollabError::too_far_behind(version, inst.history_start()));
        }
        if version == inst.version {
            return Ok(None);
        }
        Ok(Some(inst.events_since(version)))
    }

    /// Apply a batch pushed on `version`. The batch applies whole or not at all.
    pub async fn push_events(&self, req: PushEvents<D::Step>) -> Result<(), CollabError> {
        let entry = self.entry(&req.doc_name).await?;
        let version = {
            let mut inst = lock(&entry.instance);
            inst.users.insert(req.user_id);
            if req.version > inst.version || req.version < inst.history_start() {
                return Err(CollabError::invalid_version(req.version));
            }
            if req.version < inst.version {
                return Err(CollabError::conflict(req.version, inst.version));
            }
            if req.steps.is_empty() {
                return Ok(());
            }

            let doc = inst
                .doc
                .apply_all(&req.steps)
                .map_err(|e| CollabError::Unprocessable(format!("Step does not apply: {e}")))?;
            inst.doc = doc;
            inst.version += req.steps.len() as u64;
            for step in req.steps {
                inst.history.push_back((step, req.client_id.clone()));
            }
            if let Some(limit) = self.config.history_limit {
                while inst.history.len() > limit {
                    inst.history.pop_front();
                }
            }
            inst.version
        };

        debug!("{} at version {version} after push from {}", req.doc_name, req.client_id);
        entry.version_tx.send_replace(version);

        let source = Arc::clone(&entry);
        self.disk
            .update_doc(&req.doc_name, Arc::new(move || lock(&source.instance).doc.clone()));
        Ok(())
    }

    /// Bookkeeping for one loaded document.
    pub async fn instance_info(&self, doc_name: &str) -> Option<InstanceInfo> {
        let entries = self.entries.read().await;
        let entry = entries.get(doc_name)?;
        let info = lock(&entry.instance).info(doc_name);
        Some(info)
    }

    /// Bookkeeping for every loaded document, by name.
    pub async fn documents(&self) -> Vec<InstanceInfo> {
        let entries = self.entries.read().await;
        let mut infos: Vec<InstanceInfo> = entries
            .iter()
            .map(|(name, entry)| lock(&entry.instance).info(name))
            .collect();
        infos.sort_by(|a, b| a.doc_name.cmp(&b.doc_name));
        infos
    }

    /// Write every pending debounced update. Call on shutdown.
    pub async fn flush_all(&self) -> Result<usize, StoreError> {
        let written = self.disk.flush_all().await?;
        info!("Flushed {written} pending document writes");
        Ok(written)
    }

    async fn entry(&self, doc_name: &str) -> Result<Arc<Entry<D>>, CollabError> {
        if let Some(entry) = self.entries.read().await.get(doc_name) {
            return Ok(Arc::clone(entry));
        }

        // Load outside the map lock; a racing loader may win, its copy is kept.
        let doc = self.disk.get_doc(doc_name)?;
        let mut entries = self.entries.write().await;
        let entry = entries.entry(doc_name.to_string()).or_insert_with(|| {
            info!("Loaded document {doc_name}");
            let (version_tx, _) = watch::channel(0);
            Arc::new(Entry {
                instance: Mutex::new(Instance::new(doc)),
                version_tx,
            })
        });
        Ok(Arc::clone(entry))
    }
}
