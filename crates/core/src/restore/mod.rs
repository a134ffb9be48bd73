//! Restore sessions: idempotent ingestion of client caches.

mod engine;
mod model;

pub use engine::{
    ApplyBatchRequest, BatchCounts, BatchOutcome, RestoreEngine, RestoreSessionStore,
    SessionBegin, RESTORE_SESSION_STALE_AFTER_SECS,
};
pub use model::{RestorePhase, RestoreSession, RestoreSessionTally, RestoreStatus};
