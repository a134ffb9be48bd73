//! SQLite storage for the Lifeboat subsystem: the append-only event log,
//! restore sessions, derived tables and the server identity row.

pub mod db;
pub mod errors;
pub mod events;
pub mod identity;
pub mod projection;
pub mod restore;
pub mod schema;

pub use db::{create_pool, get_connection, init, run_migrations, spawn_writer, WriteHandle};
pub use events::EventRepository;
pub use identity::IdentityRepository;
pub use projection::ProjectionRepository;
pub use restore::RestoreSessionRepository;

use lifeboat_core::errors::Result;

/// Serialize a unit enum to its database string (serde representation
/// without the surrounding quotes).
pub(crate) fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

pub(crate) fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{value}\""))?)
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use crate::db::{create_pool, init, run_migrations, spawn_writer};
    use crate::{
        EventRepository, IdentityRepository, ProjectionRepository, RestoreSessionRepository,
    };

    pub(crate) struct Stores {
        pub events: EventRepository,
        pub sessions: RestoreSessionRepository,
        pub projections: ProjectionRepository,
        pub identity: IdentityRepository,
    }

    /// Fresh migrated database in a throwaway directory, with all four
    /// repositories sharing one pool and writer.
    pub(crate) fn setup_stores() -> Stores {
        let dir = tempfile::tempdir().expect("tempdir").keep();
        let db_path = init(&dir.to_string_lossy()).expect("init db");
        run_migrations(&db_path).expect("migrate db");
        let pool = create_pool(&db_path).expect("create pool");
        let writer = spawn_writer(Arc::clone(&pool));
        Stores {
            events: EventRepository::new(Arc::clone(&pool), writer.clone()),
            sessions: RestoreSessionRepository::new(Arc::clone(&pool), writer.clone()),
            projections: ProjectionRepository::new(Arc::clone(&pool), writer.clone()),
            identity: IdentityRepository::new(pool, writer),
        }
    }

    #[test]
    fn migrations_create_the_foundation_tables() {
        use diesel::prelude::*;

        let dir = tempfile::tempdir().expect("tempdir").keep();
        let db_path = init(&dir.to_string_lossy()).expect("init db");
        run_migrations(&db_path).expect("migrate db");
        let pool = create_pool(&db_path).expect("create pool");
        let mut conn = crate::get_connection(&pool).expect("conn");

        #[derive(diesel::QueryableByName)]
        struct CountRow {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            c: i64,
        }

        for table in [
            "events",
            "restore_sessions",
            "restore_session_entities",
            "server_identity",
            "equipment_records",
            "medication_records",
            "case_records",
        ] {
            let sql = format!(
                "SELECT COUNT(*) as c FROM sqlite_master WHERE type='table' AND name='{table}'"
            );
            let row = diesel::sql_query(sql)
                .get_result::<CountRow>(&mut conn)
                .expect("query sqlite_master");
            assert_eq!(row.c, 1, "missing table {table}");
        }
    }
}
