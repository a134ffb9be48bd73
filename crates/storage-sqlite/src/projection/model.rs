//! Database row types for the derived tables.

use diesel::prelude::*;

use lifeboat_core::clock::Hlc;
use lifeboat_core::errors::{DatabaseError, Error, Result};
use lifeboat_core::projection::{CaseRecord, EquipmentRecord, MedicationRecord};

fn decode_hlc(raw: &str, table: &str) -> Result<Hlc> {
    Hlc::decode(raw).ok_or_else(|| {
        Error::Database(DatabaseError::Internal(format!(
            "corrupt HLC '{raw}' in {table}"
        )))
    })
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(entity_id))]
#[diesel(table_name = crate::schema::equipment_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EquipmentRecordDB {
    pub entity_id: String,
    pub name: String,
    pub category: Option<String>,
    pub serial_number: Option<String>,
    pub status: String,
    pub retired: i32,
    pub last_note: Option<String>,
    pub updated_hlc: String,
}

impl EquipmentRecordDB {
    pub fn from_domain(record: &EquipmentRecord) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            name: record.name.clone(),
            category: record.category.clone(),
            serial_number: record.serial_number.clone(),
            status: record.status.clone(),
            retired: i32::from(record.retired),
            last_note: record.last_note.clone(),
            updated_hlc: record.updated_hlc.encode(),
        }
    }

    pub fn into_domain(self) -> Result<EquipmentRecord> {
        Ok(EquipmentRecord {
            updated_hlc: decode_hlc(&self.updated_hlc, "equipment_records")?,
            entity_id: self.entity_id,
            name: self.name,
            category: self.category,
            serial_number: self.serial_number,
            status: self.status,
            retired: self.retired != 0,
            last_note: self.last_note,
        })
    }
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(entity_id))]
#[diesel(table_name = crate::schema::medication_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MedicationRecordDB {
    pub entity_id: String,
    pub name: String,
    pub lot_number: Option<String>,
    pub unit: String,
    pub quantity_on_hand: i64,
    pub expires_on: Option<String>,
    pub updated_hlc: String,
}

impl MedicationRecordDB {
    pub fn from_domain(record: &MedicationRecord) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            name: record.name.clone(),
            lot_number: record.lot_number.clone(),
            unit: record.unit.clone(),
            quantity_on_hand: record.quantity_on_hand,
            expires_on: record.expires_on.clone(),
            updated_hlc: record.updated_hlc.encode(),
        }
    }

    pub fn into_domain(self) -> Result<MedicationRecord> {
        Ok(MedicationRecord {
            updated_hlc: decode_hlc(&self.updated_hlc, "medication_records")?,
            entity_id: self.entity_id,
            name: self.name,
            lot_number: self.lot_number,
            unit: self.unit,
            quantity_on_hand: self.quantity_on_hand,
            expires_on: self.expires_on,
        })
    }
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(entity_id))]
#[diesel(table_name = crate::schema::case_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CaseRecordDB {
    pub entity_id: String,
    pub subject_ref: String,
    pub triage_level: Option<String>,
    pub open: i32,
    pub notes_count: i64,
    pub outcome: Option<String>,
    pub opened_hlc: String,
    pub updated_hlc: String,
}

impl CaseRecordDB {
    pub fn from_domain(record: &CaseRecord) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            subject_ref: record.subject_ref.clone(),
            triage_level: record.triage_level.clone(),
            open: i32::from(record.open),
            notes_count: record.notes_count,
            outcome: record.outcome.clone(),
            opened_hlc: record.opened_hlc.encode(),
            updated_hlc: record.updated_hlc.encode(),
        }
    }

    pub fn into_domain(self) -> Result<CaseRecord> {
        Ok(CaseRecord {
            opened_hlc: decode_hlc(&self.opened_hlc, "case_records")?,
            updated_hlc: decode_hlc(&self.updated_hlc, "case_records")?,
            entity_id: self.entity_id,
            subject_ref: self.subject_ref,
            triage_level: self.triage_level,
            open: self.open != 0,
            notes_count: self.notes_count,
            outcome: self.outcome,
        })
    }
}
