//! SQLite-backed derived tables.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;

use lifeboat_core::errors::Result;
use lifeboat_core::projection::{ProjectionRows, ProjectionSnapshot, ProjectionStore};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{case_records, equipment_records, medication_records};

use super::model::{CaseRecordDB, EquipmentRecordDB, MedicationRecordDB};

pub struct ProjectionRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl ProjectionRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl ProjectionStore for ProjectionRepository {
    async fn replace_rows(&self, entity_id: &str, rows: ProjectionRows) -> Result<()> {
        let entity_id = entity_id.to_string();

        self.writer
            .exec(move |conn| {
                match rows {
                    ProjectionRows::Equipment(record) => {
                        diesel::delete(equipment_records::table.find(&entity_id))
                            .execute(conn)
                            .map_err(StorageError::from)?;
                        if let Some(record) = record {
                            diesel::insert_into(equipment_records::table)
                                .values(EquipmentRecordDB::from_domain(&record))
                                .execute(conn)
                                .map_err(StorageError::from)?;
                        }
                    }
                    ProjectionRows::Medication(record) => {
                        diesel::delete(medication_records::table.find(&entity_id))
                            .execute(conn)
                            .map_err(StorageError::from)?;
                        if let Some(record) = record {
                            diesel::insert_into(medication_records::table)
                                .values(MedicationRecordDB::from_domain(&record))
                                .execute(conn)
                                .map_err(StorageError::from)?;
                        }
                    }
                    ProjectionRows::Case(record) => {
                        diesel::delete(case_records::table.find(&entity_id))
                            .execute(conn)
                            .map_err(StorageError::from)?;
                        if let Some(record) = record {
                            diesel::insert_into(case_records::table)
                                .values(CaseRecordDB::from_domain(&record))
                                .execute(conn)
                                .map_err(StorageError::from)?;
                        }
                    }
                }
                Ok(())
            })
            .await
    }

    fn snapshot(&self) -> Result<ProjectionSnapshot> {
        let mut conn = get_connection(&self.pool)?;

        let equipment = equipment_records::table
            .order(equipment_records::entity_id.asc())
            .load::<EquipmentRecordDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(EquipmentRecordDB::into_domain)
            .collect::<Result<Vec<_>>>()?;
        let medication = medication_records::table
            .order(medication_records::entity_id.asc())
            .load::<MedicationRecordDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(MedicationRecordDB::into_domain)
            .collect::<Result<Vec<_>>>()?;
        let cases = case_records::table
            .order(case_records::entity_id.asc())
            .load::<CaseRecordDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(CaseRecordDB::into_domain)
            .collect::<Result<Vec<_>>>()?;

        Ok(ProjectionSnapshot {
            equipment,
            medication,
            cases,
        })
    }
}
