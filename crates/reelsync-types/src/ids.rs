//! Typed identifiers for timeline entities, actors, and documents.
//!
//! Entity ids are opaque strings: editors mint them as UUIDv7 text, but ids
//! arriving from elsewhere (imports, fixtures, older projects) are accepted
//! verbatim. They are stable for the lifetime of the entity and are the only
//! key the diff engine matches on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A clip identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

/// A video layer identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

/// An audio track identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

/// A marker identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(String);

/// A clip group identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

/// An actor (human editor or automation agent) that authors operations.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_string_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Mint a new time-ordered ID (UUIDv7, simple form).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7().as_simple().to_string())
            }

            /// The id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First 8 characters, for display only.
            pub fn short(&self) -> &str {
                match self.0.char_indices().nth(8) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_string_id!(ClipId, "ClipId");
impl_string_id!(LayerId, "LayerId");
impl_string_id!(TrackId, "TrackId");
impl_string_id!(MarkerId, "MarkerId");
impl_string_id!(GroupId, "GroupId");
impl_string_id!(ActorId, "ActorId");

// ── Document addressing ─────────────────────────────────────────────────────

/// Identity of a synchronized document: one sequence inside a project.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Serialize, Deserialize)]
pub struct DocumentKey {
    pub project: String,
    pub sequence: String,
}

impl DocumentKey {
    pub fn new(project: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            sequence: sequence.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.sequence)
    }
}

/// Error parsing a `project/sequence` document key.
#[derive(Debug, thiserror::Error)]
#[error("invalid document key '{0}': expected 'project/sequence'")]
pub struct DocumentKeyError(String);

impl FromStr for DocumentKey {
    type Err = DocumentKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((project, sequence))
                if !project.is_empty() && !sequence.is_empty() && !sequence.contains('/') =>
            {
                Ok(Self::new(project, sequence))
            }
            _ => Err(DocumentKeyError(s.to_string())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
