//! Pure per-entity fold functions.
//!
//! Each fold takes the full ordered history of one entity and recomputes its
//! derived row. Determinism is the load-bearing property: the same ordered
//! event sequence always produces the same record, which is what makes
//! delete-and-recompute safe to run arbitrarily often. Events that cannot be
//! decoded, or that arrive out of lifecycle, are skipped with a recorded
//! warning; a fold never aborts.

use crate::clock::EventId;
use crate::events::Event;
use crate::payloads::EventPayload;

use super::records::{
    CaseRecord, EquipmentRecord, MedicationRecord, EQUIPMENT_STATUS_IN_SERVICE,
    EQUIPMENT_STATUS_RETIRED,
};

/// One skipped event inside a fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldWarning {
    pub event_id: Option<EventId>,
    pub reason: String,
}

impl FoldWarning {
    fn skipped(event: &Event, reason: impl Into<String>) -> Self {
        Self {
            event_id: Some(event.event_id),
            reason: reason.into(),
        }
    }

    pub fn unprojected(reason: impl Into<String>) -> Self {
        Self {
            event_id: None,
            reason: reason.into(),
        }
    }
}

/// Result of folding one entity's history.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldOutcome<T> {
    pub record: Option<T>,
    pub events_folded: usize,
    pub warnings: Vec<FoldWarning>,
}

fn ordered(events: &[Event]) -> Vec<&Event> {
    let mut sorted: Vec<&Event> = events.iter().collect();
    sorted.sort_by(|a, b| a.hlc.cmp(&b.hlc).then_with(|| a.event_id.cmp(&b.event_id)));
    sorted
}

fn mismatch(event: &Event, kind: &str) -> FoldWarning {
    FoldWarning::skipped(
        event,
        format!("event type '{}' does not apply to {kind}", event.event_type),
    )
}

fn out_of_lifecycle(event: &Event, kind: &str) -> FoldWarning {
    FoldWarning::skipped(
        event,
        format!(
            "'{}' arrived before the {kind} entity existed",
            event.event_type
        ),
    )
}

pub fn fold_equipment(entity_id: &str, events: &[Event]) -> FoldOutcome<EquipmentRecord> {
    let mut record: Option<EquipmentRecord> = None;
    let mut warnings = Vec::new();
    let mut events_folded = 0usize;

    for event in ordered(events) {
        let payload = match EventPayload::decode(event) {
            Ok(payload) => payload,
            Err(reason) => {
                warnings.push(FoldWarning::skipped(event, reason));
                continue;
            }
        };
        match payload {
            EventPayload::EquipmentRegistered(body) => {
                record = Some(EquipmentRecord {
                    entity_id: entity_id.to_string(),
                    name: body.name,
                    category: body.category,
                    serial_number: body.serial_number,
                    status: EQUIPMENT_STATUS_IN_SERVICE.to_string(),
                    retired: false,
                    last_note: None,
                    updated_hlc: event.hlc.clone(),
                });
                events_folded += 1;
            }
            EventPayload::EquipmentStatusChanged(body) => match record.as_mut() {
                Some(current) => {
                    current.status = body.status;
                    current.last_note = body.note;
                    current.updated_hlc = event.hlc.clone();
                    events_folded += 1;
                }
                None => warnings.push(out_of_lifecycle(event, "equipment")),
            },
            EventPayload::EquipmentRetired(body) => match record.as_mut() {
                Some(current) => {
                    current.retired = true;
                    current.status = EQUIPMENT_STATUS_RETIRED.to_string();
                    current.last_note = body.reason;
                    current.updated_hlc = event.hlc.clone();
                    events_folded += 1;
                }
                None => warnings.push(out_of_lifecycle(event, "equipment")),
            },
            _ => warnings.push(mismatch(event, "equipment")),
        }
    }

    FoldOutcome {
        record,
        events_folded,
        warnings,
    }
}

pub fn fold_medication(entity_id: &str, events: &[Event]) -> FoldOutcome<MedicationRecord> {
    let mut record: Option<MedicationRecord> = None;
    let mut warnings = Vec::new();
    let mut events_folded = 0usize;

    for event in ordered(events) {
        let payload = match EventPayload::decode(event) {
            Ok(payload) => payload,
            Err(reason) => {
                warnings.push(FoldWarning::skipped(event, reason));
                continue;
            }
        };
        match payload {
            EventPayload::MedicationReceived(body) => {
                match record.as_mut() {
                    Some(current) => {
                        current.name = body.name;
                        current.unit = body.unit;
                        current.quantity_on_hand += body.quantity;
                        if body.lot_number.is_some() {
                            current.lot_number = body.lot_number;
                        }
                        if body.expires_on.is_some() {
                            current.expires_on = body.expires_on;
                        }
                        current.updated_hlc = event.hlc.clone();
                    }
                    None => {
                        record = Some(MedicationRecord {
                            entity_id: entity_id.to_string(),
                            name: body.name,
                            lot_number: body.lot_number,
                            unit: body.unit,
                            quantity_on_hand: body.quantity,
                            expires_on: body.expires_on,
                            updated_hlc: event.hlc.clone(),
                        });
                    }
                }
                events_folded += 1;
            }
            EventPayload::MedicationDispensed(body) => match record.as_mut() {
                Some(current) => {
                    // Raw arithmetic, no clamping: the fold is mechanical and
                    // a negative balance is a visible data problem, not one
                    // to paper over.
                    current.quantity_on_hand -= body.quantity;
                    current.updated_hlc = event.hlc.clone();
                    events_folded += 1;
                }
                None => warnings.push(out_of_lifecycle(event, "medication")),
            },
            EventPayload::MedicationAdjusted(body) => match record.as_mut() {
                Some(current) => {
                    current.quantity_on_hand += body.delta;
                    current.updated_hlc = event.hlc.clone();
                    events_folded += 1;
                }
                None => warnings.push(out_of_lifecycle(event, "medication")),
            },
            _ => warnings.push(mismatch(event, "medication")),
        }
    }

    FoldOutcome {
        record,
        events_folded,
        warnings,
    }
}

pub fn fold_case(entity_id: &str, events: &[Event]) -> FoldOutcome<CaseRecord> {
    let mut record: Option<CaseRecord> = None;
    let mut warnings = Vec::new();
    let mut events_folded = 0usize;

    for event in ordered(events) {
        let payload = match EventPayload::decode(event) {
            Ok(payload) => payload,
            Err(reason) => {
                warnings.push(FoldWarning::skipped(event, reason));
                continue;
            }
        };
        match payload {
            EventPayload::CaseOpened(body) => {
                match record.as_mut() {
                    Some(current) => {
                        current.subject_ref = body.subject_ref;
                        current.triage_level = body.triage_level;
                        current.updated_hlc = event.hlc.clone();
                    }
                    None => {
                        record = Some(CaseRecord {
                            entity_id: entity_id.to_string(),
                            subject_ref: body.subject_ref,
                            triage_level: body.triage_level,
                            open: true,
                            notes_count: 0,
                            outcome: None,
                            opened_hlc: event.hlc.clone(),
                            updated_hlc: event.hlc.clone(),
                        });
                    }
                }
                events_folded += 1;
            }
            EventPayload::CaseNoteAdded(_) => match record.as_mut() {
                Some(current) => {
                    current.notes_count += 1;
                    current.updated_hlc = event.hlc.clone();
                    events_folded += 1;
                }
                None => warnings.push(out_of_lifecycle(event, "case")),
            },
            EventPayload::CaseClosed(body) => match record.as_mut() {
                Some(current) => {
                    current.open = false;
                    current.outcome = body.outcome;
                    current.updated_hlc = event.hlc.clone();
                    events_folded += 1;
                }
                None => warnings.push(out_of_lifecycle(event, "case")),
            },
            _ => warnings.push(mismatch(event, "case")),
        }
    }

    FoldOutcome {
        record,
        events_folded,
        warnings,
    }
}
