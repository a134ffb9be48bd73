//! Typed decode of domain event payloads.
//!
//! The log stores payloads as opaque JSON; only the projection folds decode
//! them. Decoding is total: an unknown event type, a schema version newer
//! than this build understands, or a malformed body for a known type all
//! come back as a skip reason, never an error that aborts a fold. An older
//! server must survive being handed events from a newer client.

use serde::Deserialize;

use crate::events::Event;

/// Highest payload schema version this build understands.
pub const SUPPORTED_SCHEMA_VERSION: i32 = 1;

/// Event type constants for the known domain payloads.
pub mod event_types {
    pub const EQUIPMENT_REGISTERED: &str = "equipment.registered";
    pub const EQUIPMENT_STATUS_CHANGED: &str = "equipment.status_changed";
    pub const EQUIPMENT_RETIRED: &str = "equipment.retired";
    pub const MEDICATION_RECEIVED: &str = "medication.received";
    pub const MEDICATION_DISPENSED: &str = "medication.dispensed";
    pub const MEDICATION_ADJUSTED: &str = "medication.adjusted";
    pub const CASE_OPENED: &str = "case.opened";
    pub const CASE_NOTE_ADDED: &str = "case.note_added";
    pub const CASE_CLOSED: &str = "case.closed";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EquipmentRegistered {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EquipmentStatusChanged {
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EquipmentRetired {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MedicationReceived {
    pub name: String,
    #[serde(default)]
    pub lot_number: Option<String>,
    pub unit: String,
    pub quantity: i64,
    #[serde(default)]
    pub expires_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MedicationDispensed {
    pub quantity: i64,
    #[serde(default)]
    pub case_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MedicationAdjusted {
    pub delta: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaseOpened {
    pub subject_ref: String,
    #[serde(default)]
    pub triage_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaseNoteAdded {
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaseClosed {
    #[serde(default)]
    pub outcome: Option<String>,
}

/// The closed set of payload variants this build folds into projections.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    EquipmentRegistered(EquipmentRegistered),
    EquipmentStatusChanged(EquipmentStatusChanged),
    EquipmentRetired(EquipmentRetired),
    MedicationReceived(MedicationReceived),
    MedicationDispensed(MedicationDispensed),
    MedicationAdjusted(MedicationAdjusted),
    CaseOpened(CaseOpened),
    CaseNoteAdded(CaseNoteAdded),
    CaseClosed(CaseClosed),
}

impl EventPayload {
    /// Decode a stored event into its typed payload, or a skip reason.
    pub fn decode(event: &Event) -> std::result::Result<Self, String> {
        use event_types::*;

        if event.schema_version > SUPPORTED_SCHEMA_VERSION {
            return Err(format!(
                "schema version {} is newer than supported version {}",
                event.schema_version, SUPPORTED_SCHEMA_VERSION
            ));
        }

        let payload = event.payload.clone();
        let decoded = match event.event_type.as_str() {
            EQUIPMENT_REGISTERED => {
                serde_json::from_value(payload).map(Self::EquipmentRegistered)
            }
            EQUIPMENT_STATUS_CHANGED => {
                serde_json::from_value(payload).map(Self::EquipmentStatusChanged)
            }
            EQUIPMENT_RETIRED => serde_json::from_value(payload).map(Self::EquipmentRetired),
            MEDICATION_RECEIVED => serde_json::from_value(payload).map(Self::MedicationReceived),
            MEDICATION_DISPENSED => serde_json::from_value(payload).map(Self::MedicationDispensed),
            MEDICATION_ADJUSTED => serde_json::from_value(payload).map(Self::MedicationAdjusted),
            CASE_OPENED => serde_json::from_value(payload).map(Self::CaseOpened),
            CASE_NOTE_ADDED => serde_json::from_value(payload).map(Self::CaseNoteAdded),
            CASE_CLOSED => serde_json::from_value(payload).map(Self::CaseClosed),
            other => return Err(format!("unknown event type '{other}'")),
        };

        decoded.map_err(|err| format!("malformed '{}' payload: {err}", event.event_type))
    }
}
