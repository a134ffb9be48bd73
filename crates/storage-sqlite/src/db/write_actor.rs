//! Dedicated writer thread.
//!
//! All mutations run serialized on one long-lived connection, each job
//! wrapped in an immediate transaction. Readers keep using the pool; SQLite
//! gets exactly one writer, which keeps appends safe under concurrent
//! callers (ordinary domain traffic and an in-progress restore included).

use std::sync::Arc;

use diesel::sqlite::SqliteConnection;
use tokio::sync::{mpsc, oneshot};

use lifeboat_core::errors::{DatabaseError, Error, Result};

use crate::errors::StorageError;

use super::DbPool;

type WriteJob = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

enum WriteTxError {
    Domain(Error),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for WriteTxError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Diesel(err)
    }
}

/// Handle for submitting write jobs to the actor.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl WriteHandle {
    /// Run a closure on the writer connection inside an immediate
    /// transaction. A domain error rolls the transaction back.
    pub async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let boxed: WriteJob = Box::new(move |conn| {
            let outcome = conn
                .immediate_transaction::<_, WriteTxError, _>(|tx| {
                    job(tx).map_err(WriteTxError::Domain)
                })
                .map_err(|err| match err {
                    WriteTxError::Domain(inner) => inner,
                    WriteTxError::Diesel(inner) => Error::from(StorageError::from(inner)),
                });
            let _ = done_tx.send(outcome);
        });

        self.tx.send(boxed).map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "database writer is not running".to_string(),
            ))
        })?;
        done_rx.await.map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "database writer dropped the job".to_string(),
            ))
        })?
    }
}

/// Spawn the writer thread over a dedicated connection from the pool.
pub fn spawn_writer(pool: Arc<DbPool>) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();

    std::thread::Builder::new()
        .name("lifeboat-db-writer".to_string())
        .spawn(move || {
            let mut conn = match pool.get() {
                Ok(conn) => conn,
                Err(err) => {
                    log::error!("database writer failed to acquire a connection: {err}");
                    return;
                }
            };
            while let Some(job) = rx.blocking_recv() {
                job(&mut conn);
            }
        })
        .expect("failed to spawn database writer thread");

    WriteHandle { tx }
}
