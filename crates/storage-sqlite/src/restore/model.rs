//! Database row types for restore sessions.

use diesel::prelude::*;

use lifeboat_core::errors::Result;
use lifeboat_core::events::EntityRef;
use lifeboat_core::restore::RestoreSession;

use crate::{enum_from_db, enum_to_db};

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(session_id))]
#[diesel(table_name = crate::schema::restore_sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RestoreSessionDB {
    pub session_id: String,
    pub source_device_id: String,
    pub status: String,
    pub events_received: i64,
    pub events_inserted: i64,
    pub events_already_present: i64,
    pub events_rejected: i64,
    pub started_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub last_error: Option<String>,
}

impl RestoreSessionDB {
    pub fn from_domain(session: &RestoreSession) -> Result<Self> {
        Ok(Self {
            session_id: session.session_id.clone(),
            source_device_id: session.source_device_id.clone(),
            status: enum_to_db(&session.status)?,
            events_received: session.events_received,
            events_inserted: session.events_inserted,
            events_already_present: session.events_already_present,
            events_rejected: session.events_rejected,
            started_at: session.started_at.clone(),
            updated_at: session.updated_at.clone(),
            completed_at: session.completed_at.clone(),
            last_error: session.last_error.clone(),
        })
    }

    pub fn into_domain(self) -> Result<RestoreSession> {
        Ok(RestoreSession {
            status: enum_from_db(&self.status)?,
            session_id: self.session_id,
            source_device_id: self.source_device_id,
            events_received: self.events_received,
            events_inserted: self.events_inserted,
            events_already_present: self.events_already_present,
            events_rejected: self.events_rejected,
            started_at: self.started_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            last_error: self.last_error,
        })
    }
}

#[derive(Queryable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::restore_session_entities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RestoreSessionEntityDB {
    pub session_id: String,
    pub entity_type: String,
    pub entity_id: String,
}

impl RestoreSessionEntityDB {
    pub fn into_entity_ref(self) -> EntityRef {
        EntityRef::new(self.entity_type, self.entity_id)
    }
}
