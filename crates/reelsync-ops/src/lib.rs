//! Operation engine for reelsync timelines.
//!
//! Two directions over the same vocabulary:
//!
//! - [`diff`] turns a pair of snapshots into the operations that transform
//!   the first into the second.
//! - [`apply_ops`] and [`apply_ops_lenient`] replay operations onto a
//!   snapshot. The server applies strictly; clients merging other actors'
//!   work apply leniently.
//!
//! # Laws
//!
//! - `apply_ops(p, diff(p, d)) == d` for any valid `p` and `d`.
//! - `diff(p, p)` is empty.
//! - A strict batch either applies completely or leaves the input untouched.

mod apply;
mod diff;
mod error;

pub use apply::{ApplyMode, ApplyReport, apply_op, apply_ops, apply_ops_lenient, validate_unique_ids};
pub use diff::diff;
pub use error::OpError;

/// Result type for applying operations.
pub type Result<T> = std::result::Result<T, OpError>;
