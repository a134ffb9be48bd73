//! Durable local mirror of everything this device has seen.
//!
//! The cache is the raw material of a restore: all events ever exported to
//! this device, the latest derived-table snapshot, and the agent's own
//! bookkeeping (known server identity, export cursor, restore resume state).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use lifeboat_core::clock::Hlc;
use lifeboat_core::events::Event;
use lifeboat_core::projection::ProjectionSnapshot;

use crate::error::{AgentError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cached_events (
    event_id TEXT PRIMARY KEY NOT NULL,
    hlc TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cached_events_hlc ON cached_events (hlc, event_id);
CREATE TABLE IF NOT EXISTS cached_snapshot (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    row_json TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id)
);
CREATE TABLE IF NOT EXISTS agent_state (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

const STATE_SERVER_INSTANCE: &str = "known_server_instance_id";
const STATE_FINGERPRINT: &str = "known_fingerprint";
const STATE_EXPORT_CURSOR: &str = "last_export_cursor";
const STATE_RESTORE_SESSION: &str = "active_restore_session";
const STATE_ACKED_BATCHES: &str = "acked_batches";

/// Durable per-device cache backed by SQLite.
pub struct LocalCache {
    conn: Mutex<Connection>,
}

impl LocalCache {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert events idempotently; returns how many were actually new.
    pub fn store_events(&self, events: &[Event]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        for event in events {
            let body = serde_json::to_string(event)?;
            inserted += tx.execute(
                "INSERT OR IGNORE INTO cached_events (event_id, hlc, body) VALUES (?1, ?2, ?3)",
                params![event.event_id.to_string(), event.hlc.encode(), body],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Every cached event in HLC order.
    pub fn all_events(&self) -> Result<Vec<Event>> {
        let conn = self.conn();
        let mut statement =
            conn.prepare("SELECT body FROM cached_events ORDER BY hlc ASC, event_id ASC")?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        let mut events = Vec::new();
        for body in rows {
            events.push(serde_json::from_str(&body?)?);
        }
        Ok(events)
    }

    pub fn events_count(&self) -> Result<i64> {
        let conn = self.conn();
        Ok(conn.query_row("SELECT COUNT(*) FROM cached_events", [], |row| row.get(0))?)
    }

    /// Replace the cached snapshot wholesale with the latest full export.
    pub fn store_snapshot(&self, snapshot: &ProjectionSnapshot) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cached_snapshot", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO cached_snapshot (entity_type, entity_id, row_json) VALUES (?1, ?2, ?3)",
            )?;
            for record in &snapshot.equipment {
                insert.execute(params![
                    "equipment",
                    record.entity_id,
                    serde_json::to_string(record)?
                ])?;
            }
            for record in &snapshot.medication {
                insert.execute(params![
                    "medication",
                    record.entity_id,
                    serde_json::to_string(record)?
                ])?;
            }
            for record in &snapshot.cases {
                insert.execute(params![
                    "case",
                    record.entity_id,
                    serde_json::to_string(record)?
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Reassemble the cached snapshot; `None` when nothing is cached.
    pub fn cached_snapshot(&self) -> Result<Option<ProjectionSnapshot>> {
        let conn = self.conn();
        let mut statement = conn.prepare(
            "SELECT entity_type, row_json FROM cached_snapshot ORDER BY entity_type, entity_id",
        )?;
        let rows = statement
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut snapshot = ProjectionSnapshot::default();
        for (entity_type, row_json) in rows {
            match entity_type.as_str() {
                "equipment" => snapshot.equipment.push(serde_json::from_str(&row_json)?),
                "medication" => snapshot.medication.push(serde_json::from_str(&row_json)?),
                "case" => snapshot.cases.push(serde_json::from_str(&row_json)?),
                other => {
                    return Err(AgentError::invalid_request(format!(
                        "unknown snapshot section '{other}' in local cache"
                    )));
                }
            }
        }
        Ok(Some(snapshot))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Agent bookkeeping
    // ─────────────────────────────────────────────────────────────────────

    fn state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT value FROM agent_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_state(&self, key: &str, value: Option<&str>) -> Result<()> {
        let conn = self.conn();
        match value {
            Some(value) => {
                conn.execute(
                    "INSERT INTO agent_state (key, value) VALUES (?1, ?2)
                     ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )?;
            }
            None => {
                conn.execute("DELETE FROM agent_state WHERE key = ?1", params![key])?;
            }
        }
        Ok(())
    }

    pub fn known_server_instance_id(&self) -> Result<Option<String>> {
        self.state(STATE_SERVER_INSTANCE)
    }

    pub fn set_known_server_instance_id(&self, value: Option<&str>) -> Result<()> {
        self.set_state(STATE_SERVER_INSTANCE, value)
    }

    pub fn known_fingerprint(&self) -> Result<Option<String>> {
        self.state(STATE_FINGERPRINT)
    }

    pub fn set_known_fingerprint(&self, value: Option<&str>) -> Result<()> {
        self.set_state(STATE_FINGERPRINT, value)
    }

    pub fn last_export_cursor(&self) -> Result<Option<Hlc>> {
        match self.state(STATE_EXPORT_CURSOR)? {
            Some(raw) => Hlc::decode(&raw)
                .map(Some)
                .ok_or_else(|| {
                    AgentError::invalid_request(format!("corrupt export cursor '{raw}' in cache"))
                }),
            None => Ok(None),
        }
    }

    pub fn set_last_export_cursor(&self, cursor: Option<&Hlc>) -> Result<()> {
        self.set_state(STATE_EXPORT_CURSOR, cursor.map(|h| h.encode()).as_deref())
    }

    pub fn active_restore_session(&self) -> Result<Option<String>> {
        self.state(STATE_RESTORE_SESSION)
    }

    pub fn set_active_restore_session(&self, session_id: Option<&str>) -> Result<()> {
        self.set_state(STATE_RESTORE_SESSION, session_id)
    }

    /// Number of restore batches the server has acknowledged for the active
    /// session; resumption skips past them.
    pub fn acked_batches(&self) -> Result<i64> {
        Ok(self
            .state(STATE_ACKED_BATCHES)?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }

    pub fn set_acked_batches(&self, count: i64) -> Result<()> {
        self.set_state(STATE_ACKED_BATCHES, Some(&count.to_string()))
    }

    /// Administrator action: wipe the mirror entirely.
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cached_events", [])?;
        tx.execute("DELETE FROM cached_snapshot", [])?;
        tx.execute("DELETE FROM agent_state", [])?;
        tx.commit()?;
        Ok(())
    }
}
