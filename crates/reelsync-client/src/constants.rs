//! Client configuration constants.
//!
//! Defaults for [`SyncConfig`](crate::SyncConfig) fields not set in a config file.

use std::time::Duration;

/// Delay between polls while the server is reachable.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Ceiling for the poll delay after repeated transport failures.
pub const DEFAULT_POLL_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Operations requested per poll page. Whole batches are never split.
pub const DEFAULT_POLL_LIMIT: usize = 500;

/// Undo entries kept before the oldest is dropped.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
