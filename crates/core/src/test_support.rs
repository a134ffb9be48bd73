//! In-memory store implementations and event builders for engine-level
//! tests. Mirrors the storage contracts closely enough that the same engine
//! tests describe the SQLite-backed behavior.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::clock::{EventId, Hlc};
use crate::errors::{DatabaseError, Error, Result};
use crate::events::{
    replay_matches, EntityRef, Event, EventPageQuery, EventStore, NewEvent,
};
use crate::projection::{
    EquipmentRecord, ProjectionRows, ProjectionSnapshot, ProjectionStore,
    EQUIPMENT_STATUS_IN_SERVICE,
};
use crate::restore::{
    BatchCounts, RestoreSession, RestoreSessionStore, RestoreSessionTally, RestoreStatus,
    SessionBegin,
};

pub(crate) fn sample_new_event(entity_type: &str, entity_id: &str, hlc: Hlc) -> NewEvent {
    NewEvent {
        event_id: EventId::new(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        actor_id: "medic-1".to_string(),
        device_id: hlc.device_id.clone(),
        device_timestamp: "2026-03-01T08:00:00Z".to_string(),
        server_timestamp: None,
        hlc,
        event_type: format!("{entity_type}.noted"),
        schema_version: 1,
        payload: json!({ "note": "test" }),
        synced: false,
        acknowledged: false,
    }
}

pub(crate) fn sample_domain_event(
    entity_type: &str,
    entity_id: &str,
    event_type: &str,
    payload: serde_json::Value,
    hlc: Hlc,
) -> NewEvent {
    NewEvent {
        event_id: EventId::new(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        actor_id: "medic-1".to_string(),
        device_id: hlc.device_id.clone(),
        device_timestamp: "2026-03-01T08:00:00Z".to_string(),
        server_timestamp: None,
        hlc,
        event_type: event_type.to_string(),
        schema_version: 1,
        payload,
        synced: false,
        acknowledged: false,
    }
}

#[derive(Default)]
pub(crate) struct MemoryEventStore {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: NewEvent) -> Result<Event> {
        event.validate()?;
        let mut events = lock(&self.events);
        if let Some(stored) = events.iter().find(|e| e.event_id == event.event_id) {
            return if replay_matches(stored, &event) {
                Err(Error::DuplicateEvent {
                    event_id: event.event_id,
                })
            } else {
                Err(Error::Validation(format!(
                    "event '{}' already exists with different content",
                    event.event_id
                )))
            };
        }
        let stored = event.into_event(Utc::now().to_rfc3339());
        events.push(stored.clone());
        Ok(stored)
    }

    fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let mut matching: Vec<Event> = lock(&self.events)
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.hlc.cmp(&b.hlc).then_with(|| a.event_id.cmp(&b.event_id)));
        Ok(matching)
    }

    fn events_after(&self, query: &EventPageQuery) -> Result<Vec<Event>> {
        let mut matching: Vec<Event> = lock(&self.events)
            .iter()
            .filter(|e| {
                query
                    .entity_type
                    .as_deref()
                    .map_or(true, |kind| e.entity_type == kind)
            })
            .filter(|e| {
                query
                    .since_cursor
                    .as_ref()
                    .map_or(true, |cursor| e.hlc > *cursor)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.hlc.cmp(&b.hlc).then_with(|| a.event_id.cmp(&b.event_id)));
        matching.truncate(query.limit.max(0) as usize);
        Ok(matching)
    }

    fn contains(&self, event_id: &EventId) -> Result<bool> {
        Ok(lock(&self.events).iter().any(|e| e.event_id == *event_id))
    }

    fn events_count(&self) -> Result<i64> {
        Ok(lock(&self.events).len() as i64)
    }

    fn latest_hlc(&self) -> Result<Option<Hlc>> {
        Ok(lock(&self.events).iter().map(|e| e.hlc.clone()).max())
    }
}

#[derive(Default)]
pub(crate) struct MemorySessionStore {
    sessions: Mutex<HashMap<String, RestoreSession>>,
    affected: Mutex<HashMap<String, BTreeSet<EntityRef>>>,
}

impl MemorySessionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RestoreSessionStore for MemorySessionStore {
    async fn begin_or_resume(
        &self,
        session_id: &str,
        source_device_id: &str,
        stale_after_secs: i64,
    ) -> Result<SessionBegin> {
        let mut sessions = lock(&self.sessions);
        if let Some(existing) = sessions.get(session_id) {
            return Ok(if existing.status.is_terminal() {
                SessionBegin::Terminal(existing.clone())
            } else {
                SessionBegin::Resumed(existing.clone())
            });
        }

        let now = Utc::now();
        let active: Option<String> = sessions
            .values()
            .find(|s| s.status == RestoreStatus::InProgress)
            .map(|s| s.session_id.clone());
        if let Some(active_id) = active {
            let stale = sessions
                .get(&active_id)
                .and_then(|s| DateTime::parse_from_rfc3339(&s.updated_at).ok())
                .map_or(true, |updated| {
                    now.signed_duration_since(updated) > Duration::seconds(stale_after_secs)
                });
            if !stale {
                return Ok(SessionBegin::Conflict {
                    active_session_id: active_id,
                });
            }
            if let Some(stale_session) = sessions.get_mut(&active_id) {
                stale_session.status = RestoreStatus::Failed;
                stale_session.last_error = Some("session exceeded liveness timeout".to_string());
                stale_session.completed_at = Some(now.to_rfc3339());
                stale_session.updated_at = now.to_rfc3339();
            }
        }

        let session = RestoreSession {
            session_id: session_id.to_string(),
            source_device_id: source_device_id.to_string(),
            status: RestoreStatus::InProgress,
            events_received: 0,
            events_inserted: 0,
            events_already_present: 0,
            events_rejected: 0,
            started_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
            completed_at: None,
            last_error: None,
        };
        sessions.insert(session_id.to_string(), session.clone());
        Ok(SessionBegin::Started(session))
    }

    fn get(&self, session_id: &str) -> Result<Option<RestoreSession>> {
        Ok(lock(&self.sessions).get(session_id).cloned())
    }

    async fn record_batch(
        &self,
        session_id: &str,
        counts: BatchCounts,
        affected: Vec<EntityRef>,
    ) -> Result<RestoreSession> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        session.events_received += counts.received;
        session.events_inserted += counts.inserted;
        session.events_already_present += counts.already_present;
        session.events_rejected += counts.rejected;
        session.updated_at = Utc::now().to_rfc3339();
        lock(&self.affected)
            .entry(session_id.to_string())
            .or_default()
            .extend(affected);
        Ok(session.clone())
    }

    async fn finish(
        &self,
        session_id: &str,
        status: RestoreStatus,
        last_error: Option<String>,
    ) -> Result<RestoreSession> {
        let mut sessions = lock(&self.sessions);
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let now = Utc::now().to_rfc3339();
        session.status = status;
        session.last_error = last_error;
        session.completed_at = Some(now.clone());
        session.updated_at = now;
        Ok(session.clone())
    }

    fn affected_entities(&self, session_id: &str) -> Result<Vec<EntityRef>> {
        Ok(lock(&self.affected)
            .get(session_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn status_counts(&self) -> Result<RestoreSessionTally> {
        let mut tally = RestoreSessionTally::default();
        for session in lock(&self.sessions).values() {
            match session.status {
                RestoreStatus::InProgress => tally.in_progress += 1,
                RestoreStatus::Completed => tally.completed += 1,
                RestoreStatus::Partial => tally.partial += 1,
                RestoreStatus::Failed => tally.failed += 1,
            }
        }
        Ok(tally)
    }
}

#[derive(Default)]
pub(crate) struct MemoryProjectionStore {
    snapshot: Mutex<ProjectionSnapshotState>,
    fail_next_replace: AtomicBool,
}

#[derive(Default)]
struct ProjectionSnapshotState {
    equipment: BTreeMap<String, crate::projection::EquipmentRecord>,
    medication: BTreeMap<String, crate::projection::MedicationRecord>,
    cases: BTreeMap<String, crate::projection::CaseRecord>,
}

impl MemoryProjectionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_next_replace(&self) {
        self.fail_next_replace.store(true, Ordering::SeqCst);
    }

    pub(crate) fn seed_equipment(&self, entity_id: &str, name: &str) {
        let mut state = lock(&self.snapshot);
        state.equipment.insert(
            entity_id.to_string(),
            EquipmentRecord {
                entity_id: entity_id.to_string(),
                name: name.to_string(),
                category: None,
                serial_number: None,
                status: EQUIPMENT_STATUS_IN_SERVICE.to_string(),
                retired: false,
                last_note: None,
                updated_hlc: Hlc {
                    wall_ms: 1,
                    counter: 0,
                    device_id: "seed".to_string(),
                },
            },
        );
    }
}

#[async_trait]
impl ProjectionStore for MemoryProjectionStore {
    async fn replace_rows(&self, entity_id: &str, rows: ProjectionRows) -> Result<()> {
        if self.fail_next_replace.swap(false, Ordering::SeqCst) {
            return Err(Error::Database(DatabaseError::Internal(
                "simulated projection write failure".to_string(),
            )));
        }
        let mut state = lock(&self.snapshot);
        match rows {
            ProjectionRows::Equipment(record) => {
                state.equipment.remove(entity_id);
                if let Some(record) = record {
                    state.equipment.insert(entity_id.to_string(), record);
                }
            }
            ProjectionRows::Medication(record) => {
                state.medication.remove(entity_id);
                if let Some(record) = record {
                    state.medication.insert(entity_id.to_string(), record);
                }
            }
            ProjectionRows::Case(record) => {
                state.cases.remove(entity_id);
                if let Some(record) = record {
                    state.cases.insert(entity_id.to_string(), record);
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<ProjectionSnapshot> {
        let state = lock(&self.snapshot);
        Ok(ProjectionSnapshot {
            equipment: state.equipment.values().cloned().collect(),
            medication: state.medication.values().cloned().collect(),
            cases: state.cases.values().cloned().collect(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
