//! Periodic backup and the restore-trigger state machine.
//!
//! Each tick probes the server's health endpoint. An unchanged instance id
//! means a routine incremental backup; a changed id with an empty store is
//! the new-host signal that drives the restore protocol; a changed id with
//! data means another device already repopulated the host and this one just
//! adopts it.

use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::sleep;
use uuid::Uuid;

use lifeboat_core::events::Event;
use lifeboat_core::identity::HealthReport;
use lifeboat_core::restore::{ApplyBatchRequest, BatchOutcome, RestoreStatus};

use crate::cache::LocalCache;
use crate::client::{ExportQuery, LifeboatApi};
use crate::error::{AgentError, Result, RetryClass};

/// Backup cadence and jitter for the periodic loop.
pub const BACKUP_INTERVAL_SECS: u64 = 60;
pub const BACKUP_INTERVAL_JITTER_SECS: u64 = 5;

/// Upper bound on events per restore batch.
pub const RESTORE_BATCH_MAX_EVENTS: usize = 500;

const RESTORE_SUBMIT_MAX_ATTEMPTS: usize = 5;
const RESTORE_SUBMIT_BASE_BACKOFF_MS: u64 = 500;
const RESTORE_SUBMIT_MAX_BACKOFF_MS: u64 = 15_000;
const CONFLICT_POLL_MAX_ATTEMPTS: usize = 12;
const CONFLICT_POLL_INTERVAL_SECS: u64 = 5;

/// What to do when a blank replacement server is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Drive the restore protocol immediately (requires a configured
    /// operator credential).
    Automatic,
    /// Surface a prompt and wait for an explicit `restore_now` call.
    Manual,
}

/// Agent configuration. An explicit state struct owned by the agent; nothing
/// here is ambient.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub device_id: String,
    pub operator_pin: Option<String>,
    pub restore_policy: RestorePolicy,
    pub export_page_limit: i64,
    pub restore_batch_max_events: usize,
}

impl AgentConfig {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            operator_pin: None,
            restore_policy: RestorePolicy::Manual,
            export_page_limit: 500,
            restore_batch_max_events: RESTORE_BATCH_MAX_EVENTS,
        }
    }
}

/// In-process observer notifications (UI refresh, operator surfacing).
#[derive(Debug, Clone)]
pub enum AgentNotice {
    BackupCompleted {
        events_pulled: usize,
    },
    ServerReplaced {
        previous: String,
        current: String,
        events_count: i64,
    },
    RestoreStarted {
        session_id: String,
    },
    RestoreFinished {
        session_id: String,
        status: RestoreStatus,
    },
    RestorePromptRaised {
        server_instance_id: String,
    },
    RestoreDeferred {
        active_session_id: String,
    },
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    BackedUp {
        events_pulled: usize,
    },
    Restored {
        session_id: String,
        status: RestoreStatus,
    },
    RestorePromptRaised,
    RestoreDeferred {
        active_session_id: String,
    },
}

/// The client-side backup agent for one device.
pub struct BackupAgent<A: LifeboatApi> {
    api: A,
    cache: LocalCache,
    config: AgentConfig,
    notices: broadcast::Sender<AgentNotice>,
    // Backup and restore are mutually exclusive on one device.
    tick_lock: Mutex<()>,
}

impl<A: LifeboatApi> BackupAgent<A> {
    pub fn new(api: A, cache: LocalCache, config: AgentConfig) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            api,
            cache,
            config,
            notices,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentNotice> {
        self.notices.subscribe()
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    fn notify(&self, notice: AgentNotice) {
        let _ = self.notices.send(notice);
    }

    /// One scheduler tick: health probe, then either an incremental backup
    /// or the restore flow.
    pub async fn run_once(&self) -> Result<TickOutcome> {
        let _guard = self.tick_lock.lock().await;
        let health = self.api.health().await?;
        let known = self.cache.known_server_instance_id()?;

        match known {
            Some(previous) if previous != health.server_instance_id => {
                log::info!(
                    "server instance changed '{previous}' -> '{}' (events_count={})",
                    health.server_instance_id,
                    health.events_count
                );
                self.notify(AgentNotice::ServerReplaced {
                    previous,
                    current: health.server_instance_id.clone(),
                    events_count: health.events_count,
                });

                if health.events_count == 0 {
                    self.handle_blank_server(&health).await
                } else {
                    // The replacement host already has data (another device
                    // restored it first). Adopt it and re-baseline.
                    self.cache.set_last_export_cursor(None)?;
                    let pulled = self.backup_tick(&health).await?;
                    Ok(TickOutcome::BackedUp {
                        events_pulled: pulled,
                    })
                }
            }
            _ => {
                let pulled = self.backup_tick(&health).await?;
                Ok(TickOutcome::BackedUp {
                    events_pulled: pulled,
                })
            }
        }
    }

    /// Explicit operator-driven restore (e.g. after a prompt).
    pub async fn restore_now(&self, operator_pin: &str) -> Result<TickOutcome> {
        let _guard = self.tick_lock.lock().await;
        let health = self.api.health().await?;
        self.run_restore(operator_pin, &health).await
    }

    async fn handle_blank_server(&self, health: &HealthReport) -> Result<TickOutcome> {
        if self.cache.events_count()? == 0 {
            log::info!("blank server detected but the local cache is empty; adopting it");
            self.cache.set_last_export_cursor(None)?;
            let pulled = self.backup_tick(health).await?;
            return Ok(TickOutcome::BackedUp {
                events_pulled: pulled,
            });
        }

        match (self.config.restore_policy, self.config.operator_pin.as_deref()) {
            (RestorePolicy::Automatic, Some(pin)) => {
                let pin = pin.to_string();
                self.run_restore(&pin, health).await
            }
            (policy, pin) => {
                if policy == RestorePolicy::Automatic && pin.is_none() {
                    log::warn!(
                        "restore policy is automatic but no operator credential is configured; prompting instead"
                    );
                }
                self.notify(AgentNotice::RestorePromptRaised {
                    server_instance_id: health.server_instance_id.clone(),
                });
                Ok(TickOutcome::RestorePromptRaised)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Backup
    // ─────────────────────────────────────────────────────────────────────

    async fn backup_tick(&self, health: &HealthReport) -> Result<usize> {
        let mut cursor = self.cache.last_export_cursor()?;
        let full_export = cursor.is_none();
        let mut pulled = 0usize;

        loop {
            let page = self
                .api
                .export(&ExportQuery {
                    entity_type: None,
                    since_cursor: cursor.clone(),
                    limit: Some(self.config.export_page_limit),
                    include_snapshot: full_export && cursor.is_none(),
                })
                .await?;

            if page.server_instance_id != health.server_instance_id {
                // Identity drifted mid-backup; the next tick re-evaluates.
                log::warn!(
                    "server identity changed during backup ('{}' -> '{}'); stopping this pass",
                    health.server_instance_id,
                    page.server_instance_id
                );
                return Ok(pulled);
            }

            if let Some(snapshot) = page.snapshot.as_ref() {
                self.cache.store_snapshot(snapshot)?;
            }
            pulled += self.cache.store_events(&page.events)?;

            if let Some(next) = page.pagination.next_cursor.clone() {
                cursor = Some(next);
                self.cache.set_last_export_cursor(cursor.as_ref())?;
            }
            // An empty page cannot advance the cursor; stop regardless of
            // what has_more claims.
            if !page.pagination.has_more || page.events.is_empty() {
                self.cache
                    .set_known_fingerprint(Some(&page.state_fingerprint))?;
                break;
            }
        }

        self.cache
            .set_known_server_instance_id(Some(&health.server_instance_id))?;
        log::debug!("backup pass pulled {pulled} new event(s)");
        self.notify(AgentNotice::BackupCompleted {
            events_pulled: pulled,
        });
        Ok(pulled)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Restore
    // ─────────────────────────────────────────────────────────────────────

    async fn run_restore(&self, operator_pin: &str, health: &HealthReport) -> Result<TickOutcome> {
        let events = self.cache.all_events()?;
        if events.is_empty() {
            return Err(AgentError::invalid_request(
                "local cache is empty; nothing to restore",
            ));
        }

        // One session id per restore attempt, persisted so retries and
        // resumes reuse it; server-side idempotency does the rest.
        let session_id = match self.cache.active_restore_session()? {
            Some(existing) => {
                log::info!("resuming restore session '{existing}'");
                existing
            }
            None => {
                let fresh = Uuid::new_v4().to_string();
                self.cache.set_active_restore_session(Some(&fresh))?;
                self.cache.set_acked_batches(0)?;
                fresh
            }
        };
        self.notify(AgentNotice::RestoreStarted {
            session_id: session_id.clone(),
        });

        let chunk_size = self.config.restore_batch_max_events.max(1);
        let batches: Vec<&[Event]> = events.chunks(chunk_size).collect();
        let total_batches = batches.len() as i64;
        let acked = self.cache.acked_batches()?;

        if acked >= total_batches {
            // Crashed after the final ack but before local state was
            // cleared; the server already holds the terminal outcome.
            let session = self.api.restore_status(&session_id).await?;
            self.cache.set_active_restore_session(None)?;
            self.cache.set_acked_batches(0)?;
            self.cache
                .set_known_server_instance_id(Some(&health.server_instance_id))?;
            self.cache.set_last_export_cursor(None)?;
            self.notify(AgentNotice::RestoreFinished {
                session_id: session_id.clone(),
                status: session.status,
            });
            return Ok(TickOutcome::Restored {
                session_id,
                status: session.status,
            });
        }

        let mut last_outcome: Option<BatchOutcome> = None;

        for (index, chunk) in batches.iter().enumerate() {
            let batch_number = index as i64 + 1;
            if batch_number <= acked {
                continue;
            }

            let mut wire_events = Vec::with_capacity(chunk.len());
            for event in *chunk {
                wire_events.push(serde_json::to_value(event)?);
            }
            let request = ApplyBatchRequest {
                restore_session_id: session_id.clone(),
                source_device_id: self.config.device_id.clone(),
                batch_number,
                total_batches,
                is_final_batch: batch_number == total_batches,
                events: wire_events,
                snapshot: if batch_number == 1 {
                    self.cache.cached_snapshot()?
                } else {
                    None
                },
            };

            match self.submit_with_retry(operator_pin, &request).await {
                Ok(outcome) => {
                    self.cache.set_acked_batches(batch_number)?;
                    last_outcome = Some(outcome);
                }
                Err(AgentError::Conflict { active_session_id }) => {
                    // Another device won the guard. Back off and watch its
                    // session instead of retrying blindly; the next tick
                    // re-evaluates against the (hopefully restored) server.
                    log::info!(
                        "restore conflict: session '{active_session_id}' is in flight on another device"
                    );
                    self.wait_for_foreign_session(&active_session_id).await;
                    self.cache.set_active_restore_session(None)?;
                    self.cache.set_acked_batches(0)?;
                    self.notify(AgentNotice::RestoreDeferred {
                        active_session_id: active_session_id.clone(),
                    });
                    return Ok(TickOutcome::RestoreDeferred { active_session_id });
                }
                // Leaves the session and acked count in the cache: the next
                // tick resumes from the last acknowledged batch.
                Err(err) => return Err(err),
            }
        }

        let outcome = last_outcome.ok_or_else(|| {
            AgentError::invalid_request("restore finished without a terminal batch outcome")
        })?;

        // Fresh baseline against the repopulated server.
        self.cache.set_active_restore_session(None)?;
        self.cache.set_acked_batches(0)?;
        self.cache
            .set_known_server_instance_id(Some(&health.server_instance_id))?;
        self.cache.set_last_export_cursor(None)?;

        log::info!(
            "restore session '{session_id}' finished {:?}: {} inserted, {} already present, {} rejected",
            outcome.status,
            outcome.events_inserted,
            outcome.events_already_present,
            outcome.events_rejected
        );
        self.notify(AgentNotice::RestoreFinished {
            session_id: session_id.clone(),
            status: outcome.status,
        });
        Ok(TickOutcome::Restored {
            session_id,
            status: outcome.status,
        })
    }

    async fn submit_with_retry(
        &self,
        operator_pin: &str,
        request: &ApplyBatchRequest,
    ) -> Result<BatchOutcome> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.api.submit_restore_batch(operator_pin, request).await {
                Ok(outcome) => return Ok(outcome),
                Err(err)
                    if err.retry_class() == RetryClass::Retryable
                        && attempt < RESTORE_SUBMIT_MAX_ATTEMPTS =>
                {
                    let backoff = submit_backoff_with_jitter(attempt);
                    log::warn!(
                        "restore batch {} submit failed (attempt {attempt}/{RESTORE_SUBMIT_MAX_ATTEMPTS}): {err}; retrying in {backoff:?}",
                        request.batch_number
                    );
                    sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Poll the winning session until it reaches a terminal status (bounded).
    async fn wait_for_foreign_session(&self, active_session_id: &str) {
        for _ in 0..CONFLICT_POLL_MAX_ATTEMPTS {
            match self.api.restore_status(active_session_id).await {
                Ok(session) if session.status.is_terminal() => {
                    log::info!(
                        "foreign restore session '{active_session_id}' finished {:?}",
                        session.status
                    );
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    log::debug!("status poll for '{active_session_id}' failed: {err}");
                    return;
                }
            }
            sleep(Duration::from_secs(CONFLICT_POLL_INTERVAL_SECS)).await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scheduler
    // ─────────────────────────────────────────────────────────────────────

    /// Periodic loop. Network failure is never fatal; the next tick simply
    /// retries.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.run_once().await {
                Ok(outcome) => log::debug!("backup tick complete: {outcome:?}"),
                Err(err) => log::warn!("backup tick failed: {err}"),
            }

            let jitter =
                Duration::from_millis(rand::thread_rng().gen_range(0..=BACKUP_INTERVAL_JITTER_SECS * 1_000));
            tokio::select! {
                _ = sleep(interval + jitter) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

fn submit_backoff_with_jitter(attempt: usize) -> Duration {
    let exp = (attempt.saturating_sub(1) as u32).min(8);
    let backoff =
        (RESTORE_SUBMIT_BASE_BACKOFF_MS.saturating_mul(1_u64 << exp)).min(RESTORE_SUBMIT_MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=(backoff / 5).max(1));
    Duration::from_millis(backoff.saturating_add(jitter))
}
