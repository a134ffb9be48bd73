//! Derived read models: records, fold functions and the rebuilder.

mod fold;
mod rebuilder;
mod records;

pub use fold::{fold_case, fold_equipment, fold_medication, FoldOutcome, FoldWarning};
pub use rebuilder::{ProjectionRebuilder, ProjectionRows, ProjectionStore, RebuildOutcome};
pub use records::{
    CaseRecord, EquipmentRecord, MedicationRecord, ProjectionSnapshot,
    EQUIPMENT_STATUS_IN_SERVICE, EQUIPMENT_STATUS_RETIRED,
};
