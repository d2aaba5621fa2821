//! Authoritative operation log for timeline documents.
//!
//! Each document has a canonical snapshot, a version and the history of every
//! applied operation. A batch is accepted only when its expected version
//! equals the current one; it is applied strictly and atomically and advances
//! the version by exactly one.
//!
//! # Concurrency Model
//!
//! - DashMap for per-document access; an apply holds the document's entry for
//!   its whole check-apply-persist sequence
//! - Event broadcasting for activity consumers
//! - Write-through persistence with lazy loading on first access

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use reelsync_ops::{ApplyMode, apply_op, validate_unique_ids};
use reelsync_types::{
    ActorId, ApplyRequest, ApplyResponse, DocumentKey, DocumentState, OperationHistoryItem,
    PollRequest, PollResponse, TimelineSnapshot, Version, now_millis,
};

use crate::db::OpLogDb;
use crate::error::{ErrorCode, ServerError};

/// Thread-safe database handle.
type DbHandle = Arc<Mutex<OpLogDb>>;

/// Result type for operation log requests.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Events broadcast when documents change.
#[derive(Clone, Debug, PartialEq)]
pub enum OpLogEvent {
    DocumentCreated {
        key: DocumentKey,
        author: ActorId,
    },
    /// A batch landed; `version` is the document's new version.
    BatchApplied {
        key: DocumentKey,
        version: Version,
        author: ActorId,
        op_count: usize,
    },
}

/// One document in the store.
struct DocEntry {
    snapshot: TimelineSnapshot,
    version: Version,
    history: Vec<OperationHistoryItem>,
}

/// Store of versioned timeline documents.
pub struct OpLogStore {
    docs: DashMap<DocumentKey, DocEntry>,
    db: Option<DbHandle>,
    event_tx: broadcast::Sender<OpLogEvent>,
}

impl Default for OpLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OpLogStore {
    /// Create an in-memory store.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            docs: DashMap::new(),
            db: None,
            event_tx,
        }
    }

    /// Create a store that persists every accepted batch.
    pub fn with_db(db: OpLogDb) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            docs: DashMap::new(),
            db: Some(Arc::new(Mutex::new(db))),
            event_tx,
        }
    }

    /// Get the event receiver for subscribing to changes.
    pub fn subscribe(&self) -> broadcast::Receiver<OpLogEvent> {
        self.event_tx.subscribe()
    }

    /// Create a document at version 0.
    pub fn create_document(
        &self,
        key: DocumentKey,
        timeline: TimelineSnapshot,
        author: &ActorId,
    ) -> Result<DocumentState> {
        validate_unique_ids(&timeline).map_err(|e| ServerError::validation(0, &e))?;

        let entry = self.docs.entry(key.clone());
        if matches!(entry, Entry::Occupied(_)) {
            return Err(ServerError::exists(&key));
        }
        if let Some(db) = &self.db {
            let db = db.lock();
            if db.load_document(&key).map_err(ServerError::storage)?.is_some() {
                return Err(ServerError::exists(&key));
            }
            db.create_document(&key, 0, &timeline)
                .map_err(ServerError::storage)?;
        }

        entry.or_insert(DocEntry {
            snapshot: timeline.clone(),
            version: 0,
            history: Vec::new(),
        });
        info!("created document {} for {}", key, author);

        let _ = self.event_tx.send(OpLogEvent::DocumentCreated {
            key,
            author: author.clone(),
        });

        Ok(DocumentState {
            version: 0,
            timeline_data: timeline,
        })
    }

    /// Canonical snapshot and version.
    pub fn fetch(&self, key: &DocumentKey) -> Result<DocumentState> {
        let entry = self.read(key)?;
        Ok(DocumentState {
            version: entry.version,
            timeline_data: entry.snapshot.clone(),
        })
    }

    /// Current version of a document.
    pub fn version(&self, key: &DocumentKey) -> Result<Version> {
        Ok(self.read(key)?.version)
    }

    /// Apply a batch under an expected version.
    #[tracing::instrument(
        skip(self, key, request),
        fields(doc = %key, expected = request.version, ops = request.operations.len()),
        name = "oplog.apply"
    )]
    pub fn apply(
        &self,
        key: &DocumentKey,
        request: ApplyRequest,
        author: &ActorId,
    ) -> Result<ApplyResponse> {
        let mut entry = self.entry(key)?;

        if request.version != entry.version {
            debug!(
                "rejecting batch from {}: expected {}, current {}",
                author, request.version, entry.version
            );
            return Err(ServerError::concurrent_modification(
                request.version,
                entry.version,
            ));
        }
        if request.operations.is_empty() {
            return Err(ServerError::new(ErrorCode::ValidationFailed, "empty batch"));
        }

        let mut next = entry.snapshot.clone();
        for (index, op) in request.operations.iter().enumerate() {
            apply_op(&mut next, op, ApplyMode::Strict)
                .map_err(|e| ServerError::validation(index, &e))?;
        }

        let version = entry.version + 1;
        let timestamp_ms = now_millis();
        if let Some(db) = &self.db {
            db.lock()
                .append_batch(key, version, author, timestamp_ms, &request.operations, &next)
                .map_err(|e| {
                    warn!("failed to persist batch for {}: {}", key, e);
                    ServerError::storage(e)
                })?;
        }

        let op_count = request.operations.len();
        entry
            .history
            .extend(request.operations.into_iter().map(|operation| OperationHistoryItem {
                version,
                author: author.clone(),
                timestamp_ms,
                operation,
            }));
        entry.snapshot = next.clone();
        entry.version = version;
        drop(entry);

        debug!("{} advanced to version {} ({} ops)", key, version, op_count);
        let _ = self.event_tx.send(OpLogEvent::BatchApplied {
            key: key.clone(),
            version,
            author: author.clone(),
            op_count,
        });

        Ok(ApplyResponse {
            version,
            timeline_data: next,
        })
    }

    /// Operations applied after `since_version`.
    ///
    /// `limit` caps the number of items but never splits a batch, and at least
    /// one whole batch is returned when any is pending. A limit of 0 means no
    /// cap. A `since_version` past the current version yields no items.
    pub fn operations_since(&self, key: &DocumentKey, request: PollRequest) -> Result<PollResponse> {
        let entry = self.read(key)?;
        let start = entry
            .history
            .partition_point(|item| item.version <= request.since_version);
        let pending = &entry.history[start..];

        let mut end = pending.len();
        if request.limit > 0 && pending.len() > request.limit {
            // Extend to the end of the batch containing the limit-th item,
            // or cut before it when an earlier batch boundary exists.
            let boundary_version = pending[request.limit].version;
            let cut = pending.partition_point(|item| item.version < boundary_version);
            end = if cut > 0 {
                cut
            } else {
                pending.partition_point(|item| item.version <= boundary_version)
            };
        }

        Ok(PollResponse {
            current_version: entry.version,
            operations: pending[..end].to_vec(),
        })
    }

    /// Shared access to a loaded document; only a first load takes the
    /// entry for writing.
    fn read(&self, key: &DocumentKey) -> Result<Ref<'_, DocumentKey, DocEntry>> {
        if let Some(entry) = self.docs.get(key) {
            return Ok(entry);
        }
        Ok(self.entry(key)?.downgrade())
    }

    /// Get a document entry, loading it from the database on first access.
    fn entry(&self, key: &DocumentKey) -> Result<RefMut<'_, DocumentKey, DocEntry>> {
        if let Some(entry) = self.docs.get_mut(key) {
            return Ok(entry);
        }
        let Some(db) = &self.db else {
            return Err(ServerError::not_found(key));
        };

        self.docs.entry(key.clone()).or_try_insert_with(|| {
            let db = db.lock();
            let state = db
                .load_document(key)
                .map_err(ServerError::storage)?
                .ok_or_else(|| ServerError::not_found(key))?;
            let history = db.operations_since(key, 0).map_err(ServerError::storage)?;
            debug!("loaded {} at version {} ({} ops)", key, state.version, history.len());
            Ok(DocEntry {
                snapshot: state.timeline_data,
                version: state.version,
                history,
            })
        })
    }
}
