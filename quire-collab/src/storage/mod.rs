//! Storage backends for persisted documents.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐  debounced puts  ┌──────────────────┐
//! │ LocalDisk   │ ───────────────► │ dyn Storage      │
//! │ (disk.rs)   │ ◄─────────────── │  MemoryStorage   │
//! └─────────────┘      gets        │  RocksStorage    │
//!                                  └──────────────────┘
//! ```
//!
//! A backend stores one [`PersistedRecord`] per document key. Backends are
//! synchronous; callers keep them off hot async paths by debouncing.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStorage;
pub use rocks::{RocksStorage, StoreConfig};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema version of [`PersistedRecord`], unrelated to document versions.
pub const STORAGE_SCHEMA_VERSION: u32 = 1;

/// One stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub doc_name: String,
    pub title: String,
    /// Document serialized as JSON text.
    pub doc: String,
    /// Last write, epoch milliseconds.
    pub modified: u64,
    /// Creation time, epoch milliseconds. Advisory.
    pub created: u64,
    pub version: u32,
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Compression error: {0}")]
    CompressionError(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

impl From<StoreError> for crate::protocol::CollabError {
    fn from(e: StoreError) -> Self {
        crate::protocol::CollabError::server(e.to_string())
    }
}

/// Key/value persistence of document records.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<PersistedRecord>, StoreError>;
    fn put(&self, record: &PersistedRecord) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// All stored document keys, in key order.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}
