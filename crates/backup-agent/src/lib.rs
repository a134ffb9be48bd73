//! Client-side backup agent for Lifeboat stations.
//!
//! Runs on each connected device: periodically pulls incremental exports
//! into a durable local cache, detects server-identity changes, and on
//! seeing a blank replacement server drives the restore protocol from its
//! own cache.

pub mod agent;
pub mod cache;
pub mod client;
pub mod error;

pub use agent::{
    AgentConfig, AgentNotice, BackupAgent, RestorePolicy, TickOutcome,
    BACKUP_INTERVAL_JITTER_SECS, BACKUP_INTERVAL_SECS, RESTORE_BATCH_MAX_EVENTS,
};
pub use cache::LocalCache;
pub use client::{ExportQuery, LifeboatApi, LifeboatClient, OPERATOR_PIN_HEADER};
pub use error::{AgentError, Result, RetryClass};
