//! Session configuration, loaded from RON.
//!
//! ```ron
//! (
//!     poll_interval_ms: 1000,
//!     history_capacity: 50,
//! )
//! ```
//!
//! Missing fields take the defaults in [`crate::constants`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_HISTORY_CAPACITY, DEFAULT_POLL_BACKOFF_MAX, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_LIMIT,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub poll_backoff_max_ms: u64,
    pub poll_limit: usize,
    pub history_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            poll_backoff_max_ms: DEFAULT_POLL_BACKOFF_MAX.as_millis() as u64,
            poll_limit: DEFAULT_POLL_LIMIT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl SyncConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_backoff_max(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_max_ms.max(self.poll_interval_ms))
    }
}
