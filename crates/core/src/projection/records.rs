//! Derived read-model rows, one per entity, always reproducible by replay.

use serde::{Deserialize, Serialize};

use crate::clock::Hlc;

/// Equipment lifecycle statuses assigned by the fold.
pub const EQUIPMENT_STATUS_IN_SERVICE: &str = "in_service";
pub const EQUIPMENT_STATUS_RETIRED: &str = "retired";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EquipmentRecord {
    pub entity_id: String,
    pub name: String,
    pub category: Option<String>,
    pub serial_number: Option<String>,
    pub status: String,
    pub retired: bool,
    pub last_note: Option<String>,
    pub updated_hlc: Hlc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MedicationRecord {
    pub entity_id: String,
    pub name: String,
    pub lot_number: Option<String>,
    pub unit: String,
    pub quantity_on_hand: i64,
    pub expires_on: Option<String>,
    pub updated_hlc: Hlc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CaseRecord {
    pub entity_id: String,
    pub subject_ref: String,
    pub triage_level: Option<String>,
    pub open: bool,
    pub notes_count: i64,
    pub outcome: Option<String>,
    pub opened_hlc: Hlc,
    pub updated_hlc: Hlc,
}

/// Point-in-time copy of every derived table, attached to the first page of
/// a full export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProjectionSnapshot {
    pub equipment: Vec<EquipmentRecord>,
    pub medication: Vec<MedicationRecord>,
    pub cases: Vec<CaseRecord>,
}

impl ProjectionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.equipment.is_empty() && self.medication.is_empty() && self.cases.is_empty()
    }

    pub fn rows_count(&self) -> usize {
        self.equipment.len() + self.medication.len() + self.cases.len()
    }
}
