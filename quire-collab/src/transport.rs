//! Request/response transport between editor connections and the manager.
//!
//! [`LocalTransport`] runs in-process but pushes every request and reply
//! through the JSON wire format, so error classes and payloads behave as
//! they would across a network boundary.

use async_trait::async_trait;
use log::trace;
use quire_core::{Document, Step};
use std::sync::Arc;

use crate::manager::Manager;
use crate::protocol::{
    decode_reply, decode_request, encode_reply, encode_request, CollabError, DocumentSnapshot,
    Events, GetDocument, GetEvents, PushEvents, Request, Response,
};

/// The three protocol calls, as seen by a client.
#[async_trait]
pub trait Transport<S: Step>: Send + Sync {
    async fn get_document(&self, req: GetDocument) -> Result<DocumentSnapshot, CollabError>;
    async fn get_events(&self, req: GetEvents) -> Result<Events<S>, CollabError>;
    async fn push_events(&self, req: PushEvents<S>) -> Result<(), CollabError>;
}

/// In-process transport bound to a manager.
pub struct LocalTransport<D: Document> {
    manager: Arc<Manager<D>>,
}

impl<D: Document> Clone for LocalTransport<D> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<D: Document> LocalTransport<D> {
    pub fn new(manager: Arc<Manager<D>>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<Manager<D>> {
        &self.manager
    }

    async fn round_trip(
        &self,
        request: Request<D::Step>,
    ) -> Result<Response<D::Step>, CollabError> {
        let bytes = encode_request(&request)?;
        trace!("→ {}", String::from_utf8_lossy(&bytes));
        let request = decode_request::<D::Step>(&bytes)?;

        let reply = self.manager.handle(request).await;
        let bytes = encode_reply(&reply)?;
        trace!("← {}", String::from_utf8_lossy(&bytes));
        decode_reply::<D::Step>(&bytes)?
    }
}

fn unexpected<S: std::fmt::Debug>(op: &str, response: Response<S>) -> CollabError {
    CollabError::server(format!("Unexpected reply to {op}: {response:?}"))
}

#[async_trait]
impl<D: Document> Transport<D::Step> for LocalTransport<D> {
    async fn get_document(&self, req: GetDocument) -> Result<DocumentSnapshot, CollabError> {
        match self.round_trip(Request::GetDocument(req)).await? {
            Response::Document(snapshot) => Ok(snapshot),
            other => Err(unexpected("get_document", other)),
        }
    }

    async fn get_events(&self, req: GetEvents) -> Result<Events<D::Step>, CollabError> {
        match self.round_trip(Request::GetEvents(req)).await? {
            Response::Events(events) => Ok(events),
            other => Err(unexpected("get_events", other)),
        }
    }

    async fn push_events(&self, req: PushEvents<D::Step>) -> Result<(), CollabError> {
        match self.round_trip(Request::PushEvents(req)).await? {
            Response::Pushed {} => Ok(()),
            other => Err(unexpected("push_events", other)),
        }
    }
}
