//! Cursor-based export of the event log for client backup.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Hlc;
use crate::errors::Result;
use crate::events::{Event, EventPageQuery, EventStore};
use crate::identity::HealthService;
use crate::projection::{ProjectionSnapshot, ProjectionStore};

/// Default page size when the caller does not specify one.
pub const DEFAULT_EXPORT_PAGE_LIMIT: i64 = 500;

/// Parameters of one export call.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub entity_type: Option<String>,
    pub since_cursor: Option<Hlc>,
    pub limit: Option<i64>,
    pub include_snapshot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportPagination {
    pub has_more: bool,
    /// HLC of the last event on this page; absent when the page is empty
    /// (the caller keeps its previous cursor).
    pub next_cursor: Option<Hlc>,
}

/// One page of the export feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportPage {
    pub export_id: String,
    pub exported_at: String,
    pub events_count: i64,
    pub events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ProjectionSnapshot>,
    pub pagination: ExportPagination,
    pub server_instance_id: String,
    pub state_fingerprint: String,
}

/// Read-only export of the log, safe to call arbitrarily often.
pub struct ExportService {
    events: Arc<dyn EventStore>,
    projections: Arc<dyn ProjectionStore>,
    health: Arc<HealthService>,
    max_page_limit: i64,
}

impl ExportService {
    pub fn new(
        events: Arc<dyn EventStore>,
        projections: Arc<dyn ProjectionStore>,
        health: Arc<HealthService>,
        max_page_limit: i64,
    ) -> Self {
        Self {
            events,
            projections,
            health,
            max_page_limit: max_page_limit.max(1),
        }
    }

    /// Serve one page of events after the cursor, ordered by HLC.
    ///
    /// The snapshot is attached only to the first page of a full export
    /// (`include_snapshot` set and no cursor), never to incremental pages,
    /// to bound payload size. Every response carries the current instance id
    /// and fingerprint so the caller can detect identity drift even during a
    /// routine backup.
    pub fn export(&self, request: &ExportRequest) -> Result<ExportPage> {
        let limit = request
            .limit
            .unwrap_or(DEFAULT_EXPORT_PAGE_LIMIT)
            .clamp(1, self.max_page_limit);

        let mut events = self.events.events_after(&EventPageQuery {
            entity_type: request.entity_type.clone(),
            since_cursor: request.since_cursor.clone(),
            limit: limit + 1,
        })?;
        let has_more = events.len() as i64 > limit;
        if has_more {
            events.truncate(limit as usize);
        }
        let next_cursor = events.last().map(|event| event.hlc.clone());

        let snapshot = if request.include_snapshot && request.since_cursor.is_none() {
            Some(self.projections.snapshot()?)
        } else {
            None
        };

        let health = self.health.health()?;
        Ok(ExportPage {
            export_id: Uuid::new_v4().to_string(),
            exported_at: Utc::now().to_rfc3339(),
            events_count: events.len() as i64,
            events,
            snapshot,
            pagination: ExportPagination {
                has_more,
                next_cursor,
            },
            server_instance_id: health.server_instance_id,
            state_fingerprint: health.state_fingerprint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::HlcClock;
    use crate::identity::ServerIdentity;
    use crate::test_support::{sample_new_event, MemoryEventStore, MemoryProjectionStore};

    fn service(
        events: Arc<MemoryEventStore>,
        projections: Arc<MemoryProjectionStore>,
    ) -> ExportService {
        let identity = ServerIdentity {
            server_instance_id: "srv-1".to_string(),
            initialized_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let health = Arc::new(HealthService::new(identity, events.clone()));
        ExportService::new(events, projections, health, DEFAULT_EXPORT_PAGE_LIMIT)
    }

    #[tokio::test]
    async fn full_export_carries_snapshot_and_incremental_follow_up_is_empty() {
        let events = Arc::new(MemoryEventStore::new());
        let projections = Arc::new(MemoryProjectionStore::new());
        let clock = HlcClock::new("med-tablet-1");
        for index in 0..3 {
            let event = sample_new_event("equipment", &format!("eq-{index}"), clock.on_send());
            events.append(event).await.expect("append");
        }
        projections.seed_equipment("eq-0", "Defibrillator");
        let service = service(events, projections);

        let first = service
            .export(&ExportRequest {
                include_snapshot: true,
                ..Default::default()
            })
            .expect("export");
        assert_eq!(first.events_count, 3);
        assert!(!first.pagination.has_more);
        let snapshot = first.snapshot.as_ref().expect("snapshot on first page");
        assert!(!snapshot.is_empty());
        assert_eq!(first.server_instance_id, "srv-1");

        let follow_up = service
            .export(&ExportRequest {
                since_cursor: first.pagination.next_cursor.clone(),
                include_snapshot: true,
                ..Default::default()
            })
            .expect("export");
        assert_eq!(follow_up.events_count, 0);
        assert!(follow_up.snapshot.is_none(), "no snapshot on incremental pages");
        assert!(follow_up.pagination.next_cursor.is_none());
    }

    #[tokio::test]
    async fn pagination_never_reobserves_returned_events() {
        let events = Arc::new(MemoryEventStore::new());
        let projections = Arc::new(MemoryProjectionStore::new());
        let clock = HlcClock::new("med-tablet-1");
        for index in 0..5 {
            let event = sample_new_event("case", &format!("case-{index}"), clock.on_send());
            events.append(event).await.expect("append");
        }
        let service = service(events.clone(), projections);

        let first = service
            .export(&ExportRequest {
                limit: Some(2),
                ..Default::default()
            })
            .expect("export");
        assert_eq!(first.events_count, 2);
        assert!(first.pagination.has_more);

        // A concurrent append lands between the two page reads.
        events
            .append(sample_new_event("case", "case-late", clock.on_send()))
            .await
            .expect("append");

        let second = service
            .export(&ExportRequest {
                since_cursor: first.pagination.next_cursor.clone(),
                limit: Some(10),
                ..Default::default()
            })
            .expect("export");
        let first_ids: Vec<_> = first.events.iter().map(|e| e.event_id).collect();
        assert!(second
            .events
            .iter()
            .all(|event| !first_ids.contains(&event.event_id)));
        assert_eq!(second.events_count, 4);
    }

    #[tokio::test]
    async fn entity_type_filter_limits_the_feed() {
        let events = Arc::new(MemoryEventStore::new());
        let projections = Arc::new(MemoryProjectionStore::new());
        let clock = HlcClock::new("med-tablet-1");
        events
            .append(sample_new_event("equipment", "eq-1", clock.on_send()))
            .await
            .expect("append");
        events
            .append(sample_new_event("medication", "rx-1", clock.on_send()))
            .await
            .expect("append");
        let service = service(events, projections);

        let page = service
            .export(&ExportRequest {
                entity_type: Some("medication".to_string()),
                ..Default::default()
            })
            .expect("export");
        assert_eq!(page.events_count, 1);
        assert_eq!(page.events[0].entity_type, "medication");
    }
}
