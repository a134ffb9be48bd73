//! SQLite-backed server identity row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use lifeboat_core::errors::Result;
use lifeboat_core::identity::{IdentityStore, ServerIdentity};

use crate::db::{DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::server_identity;

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::server_identity)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ServerIdentityDB {
    pub id: i32,
    pub server_instance_id: String,
    pub initialized_at: String,
}

pub struct IdentityRepository {
    #[allow(dead_code)]
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl IdentityRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl IdentityStore for IdentityRepository {
    async fn get_or_init(&self) -> Result<ServerIdentity> {
        self.writer
            .exec(move |conn| {
                if let Some(row) = server_identity::table
                    .find(1)
                    .first::<ServerIdentityDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                {
                    return Ok(ServerIdentity {
                        server_instance_id: row.server_instance_id,
                        initialized_at: row.initialized_at,
                    });
                }

                let identity = ServerIdentity {
                    server_instance_id: Uuid::new_v4().to_string(),
                    initialized_at: Utc::now().to_rfc3339(),
                };
                diesel::insert_into(server_identity::table)
                    .values(ServerIdentityDB {
                        id: 1,
                        server_instance_id: identity.server_instance_id.clone(),
                        initialized_at: identity.initialized_at.clone(),
                    })
                    .execute(conn)
                    .map_err(StorageError::from)?;
                log::info!(
                    "initialized fresh server instance '{}'",
                    identity.server_instance_id
                );
                Ok(identity)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations, spawn_writer};
    use crate::test_util::setup_stores;

    #[tokio::test]
    async fn identity_is_generated_once_and_stable() {
        let stores = setup_stores();
        let first = stores.identity.get_or_init().await.expect("init");
        let second = stores.identity.get_or_init().await.expect("reload");
        assert_eq!(first, second);
        assert!(!first.server_instance_id.is_empty());
    }

    #[tokio::test]
    async fn identity_survives_a_reopen_of_the_same_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = init(&dir.path().to_string_lossy()).expect("init");
        run_migrations(&db_path).expect("migrate");

        let first = {
            let pool = create_pool(&db_path).expect("pool");
            let writer = spawn_writer(pool.clone());
            IdentityRepository::new(pool, writer)
                .get_or_init()
                .await
                .expect("init")
        };

        // Fresh pool against the same file: a reboot, not a replacement.
        let pool = create_pool(&db_path).expect("pool");
        let writer = spawn_writer(pool.clone());
        let second = IdentityRepository::new(pool, writer)
            .get_or_init()
            .await
            .expect("reload");
        assert_eq!(first, second);
    }
}
