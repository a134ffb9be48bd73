//! SQLite persistence for the derived tables.

mod model;
mod repository;

pub use model::{CaseRecordDB, EquipmentRecordDB, MedicationRecordDB};
pub use repository::ProjectionRepository;
