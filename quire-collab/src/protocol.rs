//! Request/response types for the collaboration protocol.
//!
//! Three operations, all JSON on the wire:
//! ```text
//! get_document  {docName, userId}                          → {doc, version}
//! get_events    {docName, version, userId}                 → {steps, clientIDs}
//! push_events   {clientID, version, steps, docName, userId} → {}
//! error         (any of the above)                         → {errorCode, body}
//! ```
//!
//! Error codes: 400 invalid version, 409 conflicting push, 410 history no
//! longer retained, 422 unprocessable request, other 4xx non-retryable,
//! 5xx transient.

use quire_core::ClientId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDocument {
    pub doc_name: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEvents {
    pub doc_name: String,
    pub version: u64,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvents<S> {
    #[serde(rename = "clientID")]
    pub client_id: ClientId,
    pub version: u64,
    pub steps: Vec<S>,
    pub doc_name: String,
    pub user_id: String,
}

/// A protocol request, tagged by operation name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<S> {
    GetDocument(GetDocument),
    GetEvents(GetEvents),
    PushEvents(PushEvents<S>),
}

impl<S> Request<S> {
    /// Operation name as it appears on the wire.
    pub fn op(&self) -> &'static str {
        match self {
            Request::GetDocument(_) => "get_document",
            Request::GetEvents(_) => "get_events",
            Request::PushEvents(_) => "push_events",
        }
    }

    pub fn doc_name(&self) -> &str {
        match self {
            Request::GetDocument(r) => &r.doc_name,
            Request::GetEvents(r) => &r.doc_name,
            Request::PushEvents(r) => &r.doc_name,
        }
    }
}

/// Serialized document at a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub doc: serde_json::Value,
    pub version: u64,
}

/// Steps applied after the polled version, with their origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Events<S> {
    pub steps: Vec<S>,
    #[serde(rename = "clientIDs")]
    pub client_ids: Vec<ClientId>,
}

impl<S> Events<S> {
    pub fn empty() -> Self {
        Self {
            steps: Vec::new(),
            client_ids: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A successful reply. The variant follows from the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response<S> {
    Document(DocumentSnapshot),
    Events(Events<S>),
    Pushed {},
}

/// Protocol-level failure, branched on by the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollabError {
    /// Requested or pushed version outside the known range. Restart.
    #[error("{0}")]
    InvalidVersion(String),
    /// Pushed on a stale version. Poll, then push again.
    #[error("{0}")]
    Conflict(String),
    /// History for the requested version was dropped. Restart.
    #[error("{0}")]
    TooFarBehind(String),
    /// Malformed request or steps that do not apply.
    #[error("{0}")]
    Unprocessable(String),
    /// Any other non-retryable client error.
    #[error("{body}")]
    Client { code: u16, body: String },
    /// Transient or server-side failure.
    #[error("{body}")]
    Server { code: u16, body: String },
}

impl CollabError {
    pub fn invalid_version(version: u64) -> Self {
        Self::InvalidVersion(format!("Invalid version {version}"))
    }

    pub fn conflict(pushed: u64, current: u64) -> Self {
        Self::Conflict(format!(
            "Version {pushed} not current (current is {current}), poll first"
        ))
    }

    pub fn too_far_behind(version: u64, oldest: u64) -> Self {
        Self::TooFarBehind(format!(
            "History for version {version} no longer available (oldest is {oldest})"
        ))
    }

    pub fn server(body: impl Into<String>) -> Self {
        Self::Server {
            code: 500,
            body: body.into(),
        }
    }

    pub fn error_code(&self) -> u16 {
        match self {
            Self::InvalidVersion(_) => 400,
            Self::Conflict(_) => 409,
            Self::TooFarBehind(_) => 410,
            Self::Unprocessable(_) => 422,
            Self::Client { code, .. } | Self::Server { code, .. } => *code,
        }
    }

    /// Transient errors are retried with backoff.
    pub fn is_retryable(&self) -> bool {
        self.error_code() >= 500
    }

    /// Errors after which the client must fetch the document again.
    pub fn requires_restart(&self) -> bool {
        matches!(self, Self::InvalidVersion(_) | Self::TooFarBehind(_))
    }

    /// Rebuild an error from its wire form.
    pub fn from_wire(error_code: u16, body: String) -> Self {
        match error_code {
            400 => Self::InvalidVersion(body),
            409 => Self::Conflict(body),
            410 => Self::TooFarBehind(body),
            422 => Self::Unprocessable(body),
            code if code < 500 => Self::Client { code, body },
            code => Self::Server { code, body },
        }
    }

    pub fn to_wire(&self) -> ErrorBody {
        ErrorBody {
            error_code: self.error_code(),
            body: self.to_string(),
        }
    }
}

/// Wire form of [`CollabError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: u16,
    pub body: String,
}

/// Wire encoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl From<ProtocolError> for CollabError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::SerializationError(body) => CollabError::Server { code: 500, body },
            ProtocolError::DeserializationError(body) => CollabError::Unprocessable(body),
        }
    }
}

/// Serialize a request to wire bytes.
pub fn encode_request<S: Serialize>(request: &Request<S>) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(request).map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

/// Deserialize a request from wire bytes.
pub fn decode_request<S: DeserializeOwned>(bytes: &[u8]) -> Result<Request<S>, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}

/// Serialize a reply (success or error) to wire bytes.
pub fn encode_reply<S: Serialize>(
    reply: &Result<Response<S>, CollabError>,
) -> Result<Vec<u8>, ProtocolError> {
    let bytes = match reply {
        Ok(response) => serde_json::to_vec(response),
        Err(e) => serde_json::to_vec(&e.to_wire()),
    };
    bytes.map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

/// Deserialize a reply. Error bodies come back as `Err`.
pub fn decode_reply<S: DeserializeOwned>(
    bytes: &[u8],
) -> Result<Result<Response<S>, CollabError>, ProtocolError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    if value.get("errorCode").is_some() {
        let body: ErrorBody = serde_json::from_value(value)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        return Ok(Err(CollabError::from_wire(body.error_code, body.body)));
    }
    let response = serde_json::from_value(value)
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(Ok(response))
}
