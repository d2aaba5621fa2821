//! Errors the operation log reports to submitters.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

use reelsync_ops::OpError;
use reelsync_types::{DocumentKey, Version};

/// Machine-readable error code, stable on the wire.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Expected version did not match the document's current version.
    ConcurrentModification,
    /// An operation in the batch could not be applied.
    ValidationFailed,
    DocumentNotFound,
    DocumentExists,
    /// Persistence failed; the batch was not accepted.
    StorageFailure,
}

/// A rejected request.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ServerError {
    pub code: ErrorCode,
    pub message: String,
    /// Present on `CONCURRENT_MODIFICATION`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<Version>,
}

impl ServerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            current_version: None,
        }
    }

    pub fn concurrent_modification(expected: Version, current: Version) -> Self {
        Self {
            code: ErrorCode::ConcurrentModification,
            message: format!("expected version {expected}, document is at {current}"),
            current_version: Some(current),
        }
    }

    /// Operation `index` of a batch failed validation.
    pub fn validation(index: usize, err: &OpError) -> Self {
        Self::new(ErrorCode::ValidationFailed, format!("operation {index}: {err}"))
    }

    pub fn not_found(key: &DocumentKey) -> Self {
        Self::new(ErrorCode::DocumentNotFound, format!("no document {key}"))
    }

    pub fn exists(key: &DocumentKey) -> Self {
        Self::new(ErrorCode::DocumentExists, format!("document {key} already exists"))
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::StorageFailure, err.to_string())
    }

    pub fn is_conflict(&self) -> bool {
        self.code == ErrorCode::ConcurrentModification
    }
}
