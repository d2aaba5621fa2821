//! Versioned access to one document's operation log.
//!
//! Every write carries the version the caller believes is current. The
//! returned version is a fencing token: a successful apply must land exactly
//! one version later, anything else is a protocol violation.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use reelsync_server::ServerError;
use reelsync_types::{
    ActorId, ApplyRequest, DocumentKey, DocumentState, Operation, PollRequest, PollResponse,
    TimelineSnapshot, Version,
};

use crate::transport::{OpLogTransport, TransportError};

/// Why a versioned write did not land.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    /// Someone else advanced the document first. Local state is untouched.
    #[error("version conflict: server is at {server_version}")]
    Conflict { server_version: Version },
    #[error(transparent)]
    Transport(TransportError),
    /// The server refused the batch for a reason other than its version.
    #[error("rejected: {0}")]
    Rejected(ServerError),
    #[error("server answered version {got}, expected {expected}")]
    ProtocolViolation { expected: Version, got: Version },
}

/// A batch the server accepted.
#[derive(Clone, Debug, PartialEq)]
pub struct AppliedBatch {
    pub version: Version,
    pub timeline: TimelineSnapshot,
}

/// Client for one document's log.
#[derive(Clone)]
pub struct OpLogClient {
    transport: Arc<dyn OpLogTransport>,
    key: DocumentKey,
}

impl OpLogClient {
    pub fn new(transport: Arc<dyn OpLogTransport>, key: DocumentKey) -> Self {
        Self { transport, key }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn author(&self) -> &ActorId {
        self.transport.author()
    }

    /// Submit a batch under `expected_version`. Never retried here.
    pub async fn apply(
        &self,
        expected_version: Version,
        operations: Vec<Operation>,
    ) -> Result<AppliedBatch, ApplyError> {
        let request = ApplyRequest {
            version: expected_version,
            operations,
        };
        match self.transport.apply(&self.key, request).await {
            Ok(response) if response.version == expected_version + 1 => {
                debug!("{} applied at version {}", self.key, response.version);
                Ok(AppliedBatch {
                    version: response.version,
                    timeline: response.timeline_data,
                })
            }
            Ok(response) => {
                warn!(
                    "{}: apply at {} answered version {}",
                    self.key, expected_version, response.version
                );
                Err(ApplyError::ProtocolViolation {
                    expected: expected_version + 1,
                    got: response.version,
                })
            }
            Err(TransportError::Server(err)) if err.is_conflict() => match err.current_version {
                Some(server_version) => Err(ApplyError::Conflict { server_version }),
                None => Err(ApplyError::Rejected(err)),
            },
            Err(TransportError::Server(err)) => Err(ApplyError::Rejected(err)),
            Err(err) => Err(ApplyError::Transport(err)),
        }
    }

    pub async fn poll(&self, since_version: Version, limit: usize) -> Result<PollResponse, TransportError> {
        self.transport
            .poll(&self.key, PollRequest { since_version, limit })
            .await
    }

    /// Canonical snapshot and version.
    pub async fn fetch(&self) -> Result<DocumentState, TransportError> {
        self.transport.fetch(&self.key).await
    }
}
