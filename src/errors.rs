//! Error Types
//!
//! This module defines the error types used throughout the synchronizer.
//!
//! # Overview
//!
//! The main error type [`SyncError`] covers all failure modes including:
//! - Entity resolution failures (missing or unlinked source data)
//! - Cache consistency problems (editing a node that was never created)
//! - Rejections reported by the retained scene-graph sink
//! - Edit-session discipline violations
//!
//! Entity-level errors are recoverable: a synchronization pass logs them,
//! skips the offending entity and continues with the rest of the scene.
//! [`SyncError::SessionViolation`] is different — it indicates a bug in the
//! calling code, never bad scene input, and is additionally guarded by a
//! debug assertion at the violation site.
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, SyncError>`.

use thiserror::Error;

/// The main error type for the synchronizer.
///
/// Each variant provides specific context about what went wrong and which
/// entity was involved.
#[derive(Error, Debug)]
pub enum SyncError {
    // ========================================================================
    // Entity-Level Errors (recoverable: skip, log, continue the pass)
    // ========================================================================
    /// An entity descriptor could not be resolved to a stable key.
    #[error("Cannot resolve entity '{entity}': {reason}")]
    Resolution {
        /// Name of the source entity
        entity: String,
        /// Why resolution failed
        reason: &'static str,
    },

    /// An operation expected a cache entry that is absent.
    #[error("No cached node for '{key}'")]
    CacheMiss {
        /// Canonical handle string of the missing key
        key: String,
    },

    /// The retained scene-graph sink rejected an operation.
    #[error("Scene-graph sink rejected '{node}': {message}")]
    Sink {
        /// Name of the node being mutated
        node: String,
        /// Sink-provided failure description
        message: String,
    },

    /// The scene source failed to deliver data for an entity.
    #[error("Scene source failed on '{entity}': {message}")]
    Source {
        /// Name of the source entity
        entity: String,
        /// Source-provided failure description
        message: String,
    },

    // ========================================================================
    // Engine Bugs (fatal: never caused by scene input)
    // ========================================================================
    /// Edit-session discipline was violated (nested open, close while idle,
    /// or a mutation outside any open session).
    #[error("Edit session discipline violated: {0}")]
    SessionViolation(&'static str),
}

impl SyncError {
    /// Returns true if this error may be absorbed by skipping the affected
    /// entity and continuing the synchronization pass.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SyncError::SessionViolation(_))
    }
}

/// Alias for `Result<T, SyncError>`.
pub type Result<T> = std::result::Result<T, SyncError>;
