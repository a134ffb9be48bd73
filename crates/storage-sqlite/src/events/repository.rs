//! SQLite-backed implementation of the append-only event log.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;

use lifeboat_core::clock::{EventId, Hlc};
use lifeboat_core::errors::{DatabaseError, Error, Result};
use lifeboat_core::events::{replay_matches, Event, EventPageQuery, EventStore, NewEvent};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::events;

use super::model::EventDB;

pub struct EventRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl EventRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl EventStore for EventRepository {
    async fn append(&self, event: NewEvent) -> Result<Event> {
        event.validate()?;

        self.writer
            .exec(move |conn| {
                let existing = events::table
                    .find(event.event_id.to_string())
                    .first::<EventDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?;
                if let Some(row) = existing {
                    let stored = row.into_domain()?;
                    return if replay_matches(&stored, &event) {
                        Err(Error::DuplicateEvent {
                            event_id: event.event_id,
                        })
                    } else {
                        Err(Error::Validation(format!(
                            "event '{}' already exists with different content",
                            event.event_id
                        )))
                    };
                }

                let stored = event.into_event(Utc::now().to_rfc3339());
                let row = EventDB::from_domain(&stored)?;
                diesel::insert_into(events::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(stored)
            })
            .await
    }

    fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = events::table
            .filter(events::entity_type.eq(entity_type))
            .filter(events::entity_id.eq(entity_id))
            .order((events::hlc.asc(), events::event_id.asc()))
            .load::<EventDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(EventDB::into_domain).collect()
    }

    fn events_after(&self, query: &EventPageQuery) -> Result<Vec<Event>> {
        if query.limit < 0 {
            return Err(Error::Database(DatabaseError::Internal(format!(
                "negative page limit {}",
                query.limit
            ))));
        }
        let mut conn = get_connection(&self.pool)?;
        let mut statement = events::table.into_boxed();
        if let Some(kind) = query.entity_type.as_deref() {
            statement = statement.filter(events::entity_type.eq(kind.to_string()));
        }
        if let Some(cursor) = query.since_cursor.as_ref() {
            statement = statement.filter(events::hlc.gt(cursor.encode()));
        }
        let rows = statement
            .order((events::hlc.asc(), events::event_id.asc()))
            .limit(query.limit)
            .load::<EventDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(EventDB::into_domain).collect()
    }

    fn contains(&self, event_id: &EventId) -> Result<bool> {
        let mut conn = get_connection(&self.pool)?;
        let existing = events::table
            .find(event_id.to_string())
            .select(events::event_id)
            .first::<String>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(existing.is_some())
    }

    fn events_count(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        events::table
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(|err| Error::from(StorageError::from(err)))
    }

    fn latest_hlc(&self) -> Result<Option<Hlc>> {
        let mut conn = get_connection(&self.pool)?;
        let raw = events::table
            .select(events::hlc)
            .order(events::hlc.desc())
            .first::<String>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        raw.map(|value| {
            Hlc::decode(&value).ok_or_else(|| {
                Error::Database(DatabaseError::Internal(format!(
                    "corrupt HLC '{value}' in event log"
                )))
            })
        })
        .transpose()
    }
}
