//! SQLite-backed restore session store.
//!
//! `begin_or_resume` is the global one-session-in-flight guard: the check
//! for an active session and the insert of the new one run in a single
//! writer transaction, so two simultaneous begin attempts serialize and
//! exactly one wins.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;

use lifeboat_core::errors::{Error, Result};
use lifeboat_core::events::EntityRef;
use lifeboat_core::restore::{
    BatchCounts, RestoreSession, RestoreSessionStore, RestoreSessionTally, RestoreStatus,
    SessionBegin,
};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{restore_session_entities, restore_sessions};
use crate::{enum_from_db, enum_to_db};

use super::model::{RestoreSessionDB, RestoreSessionEntityDB};

pub struct RestoreSessionRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl RestoreSessionRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

fn is_stale(updated_at: &str, now: DateTime<Utc>, stale_after_secs: i64) -> bool {
    match DateTime::parse_from_rfc3339(updated_at) {
        Ok(updated) => now.signed_duration_since(updated) > Duration::seconds(stale_after_secs),
        // An unparseable liveness timestamp cannot prove the session alive.
        Err(_) => true,
    }
}

#[async_trait]
impl RestoreSessionStore for RestoreSessionRepository {
    async fn begin_or_resume(
        &self,
        session_id: &str,
        source_device_id: &str,
        stale_after_secs: i64,
    ) -> Result<SessionBegin> {
        let session_id = session_id.to_string();
        let source_device_id = source_device_id.to_string();

        self.writer
            .exec(move |conn| {
                let now = Utc::now();
                if let Some(row) = restore_sessions::table
                    .find(&session_id)
                    .first::<RestoreSessionDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                {
                    let session = row.into_domain()?;
                    return Ok(if session.status.is_terminal() {
                        SessionBegin::Terminal(session)
                    } else {
                        SessionBegin::Resumed(session)
                    });
                }

                let active = restore_sessions::table
                    .filter(restore_sessions::status.eq(enum_to_db(&RestoreStatus::InProgress)?))
                    .first::<RestoreSessionDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?;
                if let Some(holder) = active {
                    if !is_stale(&holder.updated_at, now, stale_after_secs) {
                        return Ok(SessionBegin::Conflict {
                            active_session_id: holder.session_id,
                        });
                    }
                    // Crash recovery: fail the stale holder and release the guard.
                    log::warn!(
                        "restore session '{}' exceeded the liveness timeout; marking FAILED",
                        holder.session_id
                    );
                    diesel::update(restore_sessions::table.find(&holder.session_id))
                        .set((
                            restore_sessions::status.eq(enum_to_db(&RestoreStatus::Failed)?),
                            restore_sessions::last_error
                                .eq(Some("session exceeded liveness timeout".to_string())),
                            restore_sessions::completed_at.eq(Some(now.to_rfc3339())),
                            restore_sessions::updated_at.eq(now.to_rfc3339()),
                        ))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }

                let session = RestoreSession {
                    session_id: session_id.clone(),
                    source_device_id: source_device_id.clone(),
                    status: RestoreStatus::InProgress,
                    events_received: 0,
                    events_inserted: 0,
                    events_already_present: 0,
                    events_rejected: 0,
                    started_at: now.to_rfc3339(),
                    updated_at: now.to_rfc3339(),
                    completed_at: None,
                    last_error: None,
                };
                diesel::insert_into(restore_sessions::table)
                    .values(RestoreSessionDB::from_domain(&session)?)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(SessionBegin::Started(session))
            })
            .await
    }

    fn get(&self, session_id: &str) -> Result<Option<RestoreSession>> {
        let mut conn = get_connection(&self.pool)?;
        let row = restore_sessions::table
            .find(session_id)
            .first::<RestoreSessionDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(RestoreSessionDB::into_domain).transpose()
    }

    async fn record_batch(
        &self,
        session_id: &str,
        counts: BatchCounts,
        affected: Vec<EntityRef>,
    ) -> Result<RestoreSession> {
        let session_id = session_id.to_string();

        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                let updated = diesel::update(restore_sessions::table.find(&session_id))
                    .set((
                        restore_sessions::events_received
                            .eq(restore_sessions::events_received + counts.received),
                        restore_sessions::events_inserted
                            .eq(restore_sessions::events_inserted + counts.inserted),
                        restore_sessions::events_already_present
                            .eq(restore_sessions::events_already_present + counts.already_present),
                        restore_sessions::events_rejected
                            .eq(restore_sessions::events_rejected + counts.rejected),
                        restore_sessions::updated_at.eq(&now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if updated == 0 {
                    return Err(Error::SessionNotFound(session_id.clone()));
                }

                for entity in affected {
                    diesel::insert_into(restore_session_entities::table)
                        .values(RestoreSessionEntityDB {
                            session_id: session_id.clone(),
                            entity_type: entity.entity_type,
                            entity_id: entity.entity_id,
                        })
                        .on_conflict((
                            restore_session_entities::session_id,
                            restore_session_entities::entity_type,
                            restore_session_entities::entity_id,
                        ))
                        .do_nothing()
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }

                restore_sessions::table
                    .find(&session_id)
                    .first::<RestoreSessionDB>(conn)
                    .map_err(StorageError::from)?
                    .into_domain()
            })
            .await
    }

    async fn finish(
        &self,
        session_id: &str,
        status: RestoreStatus,
        last_error: Option<String>,
    ) -> Result<RestoreSession> {
        let session_id = session_id.to_string();

        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                let updated = diesel::update(restore_sessions::table.find(&session_id))
                    .set((
                        restore_sessions::status.eq(enum_to_db(&status)?),
                        restore_sessions::last_error.eq(last_error.clone()),
                        restore_sessions::completed_at.eq(Some(now.clone())),
                        restore_sessions::updated_at.eq(&now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if updated == 0 {
                    return Err(Error::SessionNotFound(session_id.clone()));
                }
                restore_sessions::table
                    .find(&session_id)
                    .first::<RestoreSessionDB>(conn)
                    .map_err(StorageError::from)?
                    .into_domain()
            })
            .await
    }

    fn affected_entities(&self, session_id: &str) -> Result<Vec<EntityRef>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = restore_session_entities::table
            .filter(restore_session_entities::session_id.eq(session_id))
            .order((
                restore_session_entities::entity_type.asc(),
                restore_session_entities::entity_id.asc(),
            ))
            .load::<RestoreSessionEntityDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows
            .into_iter()
            .map(RestoreSessionEntityDB::into_entity_ref)
            .collect())
    }

    fn status_counts(&self) -> Result<RestoreSessionTally> {
        let mut conn = get_connection(&self.pool)?;
        let statuses = restore_sessions::table
            .select(restore_sessions::status)
            .load::<String>(&mut conn)
            .map_err(StorageError::from)?;

        let mut tally = RestoreSessionTally::default();
        for raw in statuses {
            match enum_from_db::<RestoreStatus>(&raw)? {
                RestoreStatus::InProgress => tally.in_progress += 1,
                RestoreStatus::Completed => tally.completed += 1,
                RestoreStatus::Partial => tally.partial += 1,
                RestoreStatus::Failed => tally.failed += 1,
            }
        }
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::setup_stores;

    #[tokio::test]
    async fn begin_is_idempotent_and_guard_rejects_second_session() {
        let stores = setup_stores();

        let begin = stores
            .sessions
            .begin_or_resume("restore-1", "med-tablet-1", 600)
            .await
            .expect("begin");
        assert!(matches!(begin, SessionBegin::Started(_)));

        let resume = stores
            .sessions
            .begin_or_resume("restore-1", "med-tablet-1", 600)
            .await
            .expect("resume");
        assert!(matches!(resume, SessionBegin::Resumed(_)));

        let conflict = stores
            .sessions
            .begin_or_resume("restore-2", "med-tablet-2", 600)
            .await
            .expect("conflict decision");
        match conflict {
            SessionBegin::Conflict { active_session_id } => {
                assert_eq!(active_session_id, "restore-1");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_in_progress_session_is_failed_and_released() {
        let stores = setup_stores();
        stores
            .sessions
            .begin_or_resume("restore-1", "med-tablet-1", 600)
            .await
            .expect("begin");

        // Zero tolerance makes the holder immediately stale.
        let begin = stores
            .sessions
            .begin_or_resume("restore-2", "med-tablet-2", -1)
            .await
            .expect("takeover");
        assert!(matches!(begin, SessionBegin::Started(_)));

        let stale = stores
            .sessions
            .get("restore-1")
            .expect("get")
            .expect("session");
        assert_eq!(stale.status, RestoreStatus::Failed);
        assert!(stale
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("liveness timeout"));
    }

    #[tokio::test]
    async fn batches_accumulate_counts_and_affected_entities() {
        let stores = setup_stores();
        stores
            .sessions
            .begin_or_resume("restore-1", "med-tablet-1", 600)
            .await
            .expect("begin");

        stores
            .sessions
            .record_batch(
                "restore-1",
                BatchCounts {
                    received: 3,
                    inserted: 2,
                    already_present: 1,
                    rejected: 0,
                },
                vec![
                    EntityRef::new("equipment", "eq-1"),
                    EntityRef::new("case", "case-1"),
                ],
            )
            .await
            .expect("batch 1");
        let session = stores
            .sessions
            .record_batch(
                "restore-1",
                BatchCounts {
                    received: 2,
                    inserted: 1,
                    already_present: 0,
                    rejected: 1,
                },
                vec![
                    // Duplicate pair across batches collapses to one entry.
                    EntityRef::new("equipment", "eq-1"),
                    EntityRef::new("medication", "rx-1"),
                ],
            )
            .await
            .expect("batch 2");

        assert_eq!(session.events_received, 5);
        assert_eq!(session.events_inserted, 3);
        assert_eq!(session.events_already_present, 1);
        assert_eq!(session.events_rejected, 1);

        let affected = stores
            .sessions
            .affected_entities("restore-1")
            .expect("affected");
        assert_eq!(affected.len(), 3);

        let finished = stores
            .sessions
            .finish("restore-1", RestoreStatus::Partial, None)
            .await
            .expect("finish");
        assert_eq!(finished.status, RestoreStatus::Partial);
        assert!(finished.completed_at.is_some());

        let tally = stores.sessions.status_counts().expect("tally");
        assert_eq!(tally.partial, 1);
        assert_eq!(tally.in_progress, 0);
    }
}
