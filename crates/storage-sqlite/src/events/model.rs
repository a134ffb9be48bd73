//! Database row type for the event log.

use diesel::prelude::*;

use lifeboat_core::clock::Hlc;
use lifeboat_core::errors::{DatabaseError, Error, Result};
use lifeboat_core::events::Event;

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone)]
#[diesel(primary_key(event_id))]
#[diesel(table_name = crate::schema::events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventDB {
    pub event_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: String,
    pub device_id: String,
    pub device_timestamp: String,
    pub server_timestamp: String,
    pub hlc: String,
    pub event_type: String,
    pub schema_version: i32,
    pub payload: String,
    pub synced: i32,
    pub acknowledged: i32,
}

impl EventDB {
    pub fn from_domain(event: &Event) -> Result<Self> {
        Ok(Self {
            event_id: event.event_id.to_string(),
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id.clone(),
            actor_id: event.actor_id.clone(),
            device_id: event.device_id.clone(),
            device_timestamp: event.device_timestamp.clone(),
            server_timestamp: event.server_timestamp.clone(),
            hlc: event.hlc.encode(),
            event_type: event.event_type.clone(),
            schema_version: event.schema_version,
            payload: serde_json::to_string(&event.payload)?,
            synced: i32::from(event.synced),
            acknowledged: i32::from(event.acknowledged),
        })
    }

    pub fn into_domain(self) -> Result<Event> {
        let event_id = self.event_id.parse().map_err(|_| {
            Error::Database(DatabaseError::Internal(format!(
                "corrupt event_id '{}' in event log",
                self.event_id
            )))
        })?;
        let hlc = Hlc::decode(&self.hlc).ok_or_else(|| {
            Error::Database(DatabaseError::Internal(format!(
                "corrupt HLC '{}' in event log",
                self.hlc
            )))
        })?;
        Ok(Event {
            event_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            actor_id: self.actor_id,
            device_id: self.device_id,
            device_timestamp: self.device_timestamp,
            server_timestamp: self.server_timestamp,
            hlc,
            event_type: self.event_type,
            schema_version: self.schema_version,
            payload: serde_json::from_str(&self.payload)?,
            synced: self.synced != 0,
            acknowledged: self.acknowledged != 0,
        })
    }
}
