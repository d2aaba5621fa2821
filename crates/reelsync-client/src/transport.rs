//! Transport seam between a session and the operation log.
//!
//! The session only ever talks to an [`OpLogTransport`]. [`LocalTransport`]
//! calls an in-process [`OpLogStore`] directly; a network transport would
//! carry the same request/response types as JSON.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use reelsync_server::{OpLogStore, ServerError};
use reelsync_types::{
    ActorId, ApplyRequest, ApplyResponse, DocumentKey, DocumentState, PollRequest, PollResponse,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The server answered with an error.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// The request did not complete; the server may or may not have seen it.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait OpLogTransport: Send + Sync {
    /// Who the server records as the author of applied batches.
    fn author(&self) -> &ActorId;

    async fn apply(
        &self,
        key: &DocumentKey,
        request: ApplyRequest,
    ) -> Result<ApplyResponse, TransportError>;

    async fn poll(
        &self,
        key: &DocumentKey,
        request: PollRequest,
    ) -> Result<PollResponse, TransportError>;

    async fn fetch(&self, key: &DocumentKey) -> Result<DocumentState, TransportError>;
}

/// Transport to a store in the same process.
#[derive(Clone)]
pub struct LocalTransport {
    store: Arc<OpLogStore>,
    author: ActorId,
}

impl LocalTransport {
    pub fn new(store: Arc<OpLogStore>, author: impl Into<ActorId>) -> Self {
        Self {
            store,
            author: author.into(),
        }
    }

    pub fn store(&self) -> &Arc<OpLogStore> {
        &self.store
    }
}

#[async_trait]
impl OpLogTransport for LocalTransport {
    fn author(&self) -> &ActorId {
        &self.author
    }

    async fn apply(
        &self,
        key: &DocumentKey,
        request: ApplyRequest,
    ) -> Result<ApplyResponse, TransportError> {
        Ok(self.store.apply(key, request, &self.author)?)
    }

    async fn poll(
        &self,
        key: &DocumentKey,
        request: PollRequest,
    ) -> Result<PollResponse, TransportError> {
        Ok(self.store.operations_since(key, request)?)
    }

    async fn fetch(&self, key: &DocumentKey) -> Result<DocumentState, TransportError> {
        Ok(self.store.fetch(key)?)
    }
}
