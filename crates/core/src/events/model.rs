//! The event record: the unit of truth for the log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{EventId, Hlc};
use crate::errors::{Error, Result};

/// Entity kinds with a derived projection. The log itself accepts an open
/// set of entity types; unknown ones are stored and exported but rebuild to
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Equipment,
    Medication,
    Case,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Equipment,
        EntityKind::Medication,
        EntityKind::Case,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "equipment" => Some(Self::Equipment),
            "medication" => Some(Self::Medication),
            "case" => Some(Self::Case),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equipment => "equipment",
            Self::Medication => "medication",
            Self::Case => "case",
        }
    }
}

/// The logical object a group of events belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// A stored event. Immutable once written: corrections are new events,
/// never in-place edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Event {
    pub event_id: EventId,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: String,
    pub device_id: String,
    /// Wall-clock time at the originating device. Untrusted, informational.
    pub device_timestamp: String,
    /// Wall-clock time at first ingestion. Set once; a replay that carries
    /// the original value keeps it.
    pub server_timestamp: String,
    pub hlc: Hlc,
    pub event_type: String,
    pub schema_version: i32,
    /// Domain-opaque in the log; decoded only by the projection folds.
    pub payload: Value,
    pub synced: bool,
    pub acknowledged: bool,
}

impl Event {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.entity_id.clone())
    }
}

/// An event submitted for ingestion. `server_timestamp` is absent for fresh
/// domain traffic and present when a client replays its cache during restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NewEvent {
    pub event_id: EventId,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: String,
    pub device_id: String,
    pub device_timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<String>,
    pub hlc: Hlc,
    pub event_type: String,
    pub schema_version: i32,
    pub payload: Value,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub acknowledged: bool,
}

impl NewEvent {
    /// Decode one event from a raw wire value. Used per-element in restore
    /// batches so one malformed event never rejects its whole batch.
    pub fn from_value(raw: Value) -> Result<Self> {
        serde_json::from_value(raw)
            .map_err(|err| Error::Validation(format!("malformed event: {err}")))
    }

    /// Structural validation of required fields.
    pub fn validate(&self) -> Result<()> {
        if self.event_id.as_uuid().is_nil() {
            return Err(Error::validation("event_id must not be nil"));
        }
        require("entity_type", &self.entity_type)?;
        require("entity_id", &self.entity_id)?;
        require("actor_id", &self.actor_id)?;
        require("device_id", &self.device_id)?;
        require("event_type", &self.event_type)?;
        if self.schema_version < 1 {
            return Err(Error::validation(format!(
                "schema_version must be >= 1, got {}",
                self.schema_version
            )));
        }
        Ok(())
    }

    /// Finalize into a stored event. `ingested_at` is used only when the
    /// incoming event carries no server timestamp (fresh traffic); replays
    /// keep the original.
    pub fn into_event(self, ingested_at: String) -> Event {
        Event {
            event_id: self.event_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            actor_id: self.actor_id,
            device_id: self.device_id,
            device_timestamp: self.device_timestamp,
            server_timestamp: self.server_timestamp.unwrap_or(ingested_at),
            hlc: self.hlc,
            event_type: self.event_type,
            schema_version: self.schema_version,
            payload: self.payload,
            synced: self.synced,
            acknowledged: self.acknowledged,
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!(
            "missing required field '{field}'"
        )));
    }
    Ok(())
}

/// True when a stored event and an incoming copy carry identical content.
///
/// Distinguishes an idempotent replay from a corrupted or mutated copy of an
/// already-known event id, which must be rejected rather than overwritten.
/// The server timestamp is excluded: it belongs to the original ingestion.
pub fn replay_matches(stored: &Event, incoming: &NewEvent) -> bool {
    stored.entity_type == incoming.entity_type
        && stored.entity_id == incoming.entity_id
        && stored.actor_id == incoming.actor_id
        && stored.device_id == incoming.device_id
        && stored.device_timestamp == incoming.device_timestamp
        && stored.hlc == incoming.hlc
        && stored.event_type == incoming.event_type
        && stored.schema_version == incoming.schema_version
        && stored.payload == incoming.payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_new_event() -> NewEvent {
        NewEvent {
            event_id: EventId::new(),
            entity_type: "equipment".to_string(),
            entity_id: "eq-001".to_string(),
            actor_id: "medic-7".to_string(),
            device_id: "med-tablet-1".to_string(),
            device_timestamp: "2026-03-01T08:00:00Z".to_string(),
            server_timestamp: None,
            hlc: Hlc {
                wall_ms: 1_000,
                counter: 0,
                device_id: "med-tablet-1".to_string(),
            },
            event_type: "equipment.registered".to_string(),
            schema_version: 1,
            payload: json!({ "name": "Defibrillator" }),
            synced: false,
            acknowledged: false,
        }
    }

    #[test]
    fn validation_rejects_blank_required_fields() {
        let mut event = sample_new_event();
        event.entity_id = "  ".to_string();
        let err = event.validate().expect_err("blank entity_id");
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn from_value_rejects_missing_fields() {
        let raw = json!({ "event_id": EventId::new(), "entity_type": "equipment" });
        assert!(matches!(
            NewEvent::from_value(raw),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn into_event_keeps_replayed_server_timestamp() {
        let mut event = sample_new_event();
        event.server_timestamp = Some("2026-03-01T08:00:05Z".to_string());
        let stored = event.into_event("2026-06-01T00:00:00Z".to_string());
        assert_eq!(stored.server_timestamp, "2026-03-01T08:00:05Z");

        let fresh = sample_new_event().into_event("2026-06-01T00:00:00Z".to_string());
        assert_eq!(fresh.server_timestamp, "2026-06-01T00:00:00Z");
    }

    #[test]
    fn replay_match_detects_mutated_payload() {
        let incoming = sample_new_event();
        let stored = incoming.clone().into_event("2026-06-01T00:00:00Z".to_string());
        assert!(replay_matches(&stored, &incoming));

        let mut corrupted = incoming;
        corrupted.payload = json!({ "name": "Ventilator" });
        assert!(!replay_matches(&stored, &corrupted));
    }

    #[test]
    fn wire_event_json_deserializes_as_new_event() {
        let stored = sample_new_event().into_event("2026-06-01T00:00:00Z".to_string());
        let raw = serde_json::to_value(&stored).expect("serialize");
        let replayed = NewEvent::from_value(raw).expect("event json is a valid submission");
        assert_eq!(replayed.event_id, stored.event_id);
        assert_eq!(
            replayed.server_timestamp.as_deref(),
            Some("2026-06-01T00:00:00Z")
        );
    }
}
