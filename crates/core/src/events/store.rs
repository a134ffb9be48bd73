//! Storage contract for the append-only event log.

use async_trait::async_trait;

use crate::clock::{EventId, Hlc};
use crate::errors::Result;

use super::model::{Event, NewEvent};

/// Query for one page of the log.
#[derive(Debug, Clone, Default)]
pub struct EventPageQuery {
    pub entity_type: Option<String>,
    pub since_cursor: Option<Hlc>,
    pub limit: i64,
}

/// The append-only event log.
///
/// Writes are serialized by the implementation and safe under concurrent
/// callers; ordinary domain traffic and an in-progress restore may append
/// at the same time.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert one event.
    ///
    /// - `Error::Validation` for missing required fields, and for an existing
    ///   `event_id` whose stored content differs from the incoming copy
    ///   (reject, never overwrite).
    /// - `Error::DuplicateEvent` for an existing `event_id` with identical
    ///   content; callers treat this as success-via-idempotency.
    async fn append(&self, event: NewEvent) -> Result<Event>;

    /// Full ordered history (by HLC) for one entity. Used exclusively by the
    /// projection rebuilder.
    fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>>;

    /// Next page of events strictly after the cursor, ordered by
    /// `(hlc, event_id)`. Keyset pagination: concurrent appends never cause
    /// a page to duplicate or skip entries already returned under the same
    /// cursor.
    fn events_after(&self, query: &EventPageQuery) -> Result<Vec<Event>>;

    /// True when the event id is already stored.
    fn contains(&self, event_id: &EventId) -> Result<bool>;

    fn events_count(&self) -> Result<i64>;

    /// Highest HLC position in the log.
    fn latest_hlc(&self) -> Result<Option<Hlc>>;
}
