//! Authoritative operation log for reelsync.
//!
//! The store owns the canonical snapshot and version of every document.
//! Clients submit batches of operations under an expected version (optimistic
//! concurrency), poll for operations applied since a version, and fetch the
//! canonical state. Persistence is optional and write-through.

pub mod db;
pub mod error;
pub mod oplog_store;

pub use db::{DbError, OpLogDb};
pub use error::{ErrorCode, ServerError};
pub use oplog_store::{OpLogEvent, OpLogStore};
