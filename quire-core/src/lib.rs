//! # quire-core: document engine seam for Quire collaboration
//!
//! The sync layer never looks inside a document. It only needs to:
//!
//! - serialize a document to JSON and back,
//! - apply a [`Step`] to get the next document,
//! - rebase an unconfirmed step over a remote one,
//! - measure content size and derive a title.
//!
//! Those capabilities are the [`Document`] and [`Step`] traits. The
//! [`collab`] module holds the per-editor collaboration state built on them,
//! and [`text`] provides a plain-text document used by tests, benches and
//! the play binary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub mod collab;
pub mod text;

pub use collab::{EditState, Sendable};
pub use text::{TextDoc, TextStep};

/// Errors raised when a step cannot be applied to a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("Position {pos} out of range (document size {size})")]
    OutOfRange { pos: usize, size: usize },
    #[error("Invalid range {from}..{to}")]
    InvalidRange { from: usize, to: usize },
}

/// Which side wins when two steps touch the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// The rebased step lands before the other step's insertion.
    Before,
    /// The rebased step lands after the other step's insertion.
    After,
}

/// An atomic, serializable edit.
pub trait Step:
    Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Transform this step so it applies to a document that `over` was
    /// already applied to.
    fn rebase(&self, over: &Self, bias: Bias) -> Self;
}

/// Versioned content the collaboration layer synchronizes.
pub trait Document:
    Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Step: Step;

    /// Apply one step, producing the next document.
    fn apply(&self, step: &Self::Step) -> Result<Self, StepError>;

    /// Content size in document units, used by the client size guard.
    fn content_size(&self) -> usize;

    /// Title derived from the first textual content, if any.
    fn title(&self) -> Option<String>;

    /// Apply a batch of steps in order.
    fn apply_all<'a, I>(&self, steps: I) -> Result<Self, StepError>
    where
        I: IntoIterator<Item = &'a Self::Step>,
    {
        let mut doc = self.clone();
        for step in steps {
            doc = doc.apply(step)?;
        }
        Ok(doc)
    }
}

/// Identifies the editing session that produced a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for a new editing session.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
