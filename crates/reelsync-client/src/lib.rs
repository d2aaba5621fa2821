//! Reelsync client library
//!
//! Keeps one actor's copy of a timeline document in sync with the operation
//! log. Edits are diffed into operations and written under the last confirmed
//! version; other actors' operations are merged by polling; version races
//! surface as conflicts the user resolves; undo and redo are ordinary
//! versioned writes rebased onto whatever is confirmed at the time.
//!
//! Most consumers want [`spawn_session`] and a [`spawn_poll_loop`] on the
//! returned handle.

pub mod actor;
pub mod config;
pub mod conflict;
pub mod constants;
pub mod history;
pub mod merge;
pub mod oplog;
pub mod poller;
pub mod session;
pub mod transport;

pub use actor::{SessionHandle, spawn_session};
pub use config::{ConfigError, SyncConfig};
pub use conflict::{ConflictRecord, Resolution, SyncState};
pub use history::{HistoryEntry, HistoryManager};
pub use merge::{MergeOutcome, merge_remote, replay_remote};
pub use oplog::{AppliedBatch, ApplyError, OpLogClient};
pub use poller::{PollLoop, backoff_delay, spawn_poll_loop};
pub use session::{
    EditOutcome, PendingEdit, PollOutcome, SessionError, SessionView, SyncSession,
};
pub use transport::{LocalTransport, OpLogTransport, TransportError};
