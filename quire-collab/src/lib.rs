//! # quire-collab: collaborative editing sync core for Quire
//!
//! Editors share a document through a central authority using versioned
//! step batches, long-polling and optimistic concurrency.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   get_document   ┌─────────────┐
//! │ EditorConnection │ ───────────────► │             │
//! │ (per editor)     │   get_events     │  Manager    │
//! │  Machine + view  │ ◄──────────────► │ (authority) │
//! └──────────────────┘   push_events    └──────┬──────┘
//!          ▲                 Transport          │ debounced
//!          │ Status                             ▼
//!    ConnectionHandle                    ┌─────────────┐
//!                                        │ LocalDisk   │
//!                                        │  └ Storage  │
//!                                        └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: request/response types, JSON wire format, error codes
//! - [`storage`]: record backends (memory, RocksDB)
//! - [`disk`]: debounced per-document persistence
//! - [`manager`]: the authority (versions, history, long-polls)
//! - [`transport`]: client-side view of the three protocol calls
//! - [`client`]: connection state machine and its async driver
//! - [`config`]: aggregate configuration

pub mod client;
pub mod config;
pub mod disk;
pub mod manager;
pub mod protocol;
pub mod storage;
pub mod transport;

pub use client::{
    ClientConfig, Comm, ConnectionError, ConnectionHandle, ConnectionParams, EditorConnection,
    EditorView, Machine, NullView, Status,
};
pub use config::{CollabConfig, ConfigError};
pub use disk::{Disk, DiskConfig, LatestDoc, LocalDisk};
pub use manager::{InstanceInfo, Manager, ManagerConfig};
pub use protocol::{CollabError, DocumentSnapshot, Events, ProtocolError, Request, Response};
pub use storage::{
    MemoryStorage, PersistedRecord, RocksStorage, Storage, StoreConfig, StoreError,
    STORAGE_SCHEMA_VERSION,
};
pub use transport::{LocalTransport, Transport};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
