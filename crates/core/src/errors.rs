//! Error taxonomy for the Lifeboat subsystem.

use thiserror::Error;

use crate::clock::EventId;

/// Result type alias for Lifeboat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the event log, export and restore paths.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed event or request. Recovered locally during a restore batch
    /// (counted as rejected); never aborts the whole batch.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The event identifier already exists with identical content. Callers
    /// treat this as success-via-idempotency, not a hard failure.
    #[error("Event '{event_id}' already exists")]
    DuplicateEvent { event_id: EventId },

    /// Another restore session currently holds the single-session guard.
    /// Surfaced to the caller as a conflict; retry later.
    #[error("Restore session '{active_session_id}' is already in progress")]
    RestoreInProgress { active_session_id: String },

    /// Missing or invalid credential for a privileged operation. No partial
    /// effect has been applied.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Projection rebuild failed. The underlying events remain durable and
    /// rebuild can be retried independently of re-ingesting events.
    #[error("Rebuild error: {0}")]
    Rebuild(String),

    /// Lookup of a restore session that does not exist.
    #[error("Restore session '{0}' not found")]
    SessionNotFound(String),

    /// Storage failure.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Storage-level failure categories, kept independent of any backend crate.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when the error is the idempotent duplicate-event signal.
    pub fn is_duplicate_event(&self) -> bool {
        matches!(self, Self::DuplicateEvent { .. })
    }
}
