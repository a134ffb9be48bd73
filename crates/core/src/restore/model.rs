//! Restore session records and the engine's processing phases.

use serde::{Deserialize, Serialize};

/// Persisted session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestoreStatus {
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl RestoreStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// One attempt to repopulate a server. Counters accumulate across batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RestoreSession {
    pub session_id: String,
    pub source_device_id: String,
    pub status: RestoreStatus,
    pub events_received: i64,
    pub events_inserted: i64,
    pub events_already_present: i64,
    pub events_rejected: i64,
    pub started_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub last_error: Option<String>,
}

/// Aggregate session counts for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RestoreSessionTally {
    pub in_progress: i64,
    pub completed: i64,
    pub partial: i64,
    pub failed: i64,
}

/// In-memory processing phase of one restore submission.
///
/// The persisted status stays IN_PROGRESS until a terminal transition; the
/// phase tracks where inside a submission the engine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Receiving,
    Validating,
    Applying,
    Rebuilding,
    Completed,
    Partial,
    Failed,
}

impl RestorePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }

    /// Legal forward transitions. FAILED is reachable from any non-terminal
    /// phase; PARTIAL only once events have been applied.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Self::Failed) => true,
            (Self::Receiving, Self::Validating) => true,
            (Self::Validating, Self::Applying) => true,
            (Self::Applying, Self::Rebuilding) => true,
            (Self::Applying | Self::Rebuilding, Self::Partial) => true,
            (Self::Rebuilding, Self::Completed) => true,
            _ => false,
        }
    }
}
