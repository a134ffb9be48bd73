//! Health probe and aggregate stats.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use lifeboat_core::events::EventStore;
use lifeboat_core::identity::HealthReport;
use lifeboat_core::restore::{RestoreSessionStore, RestoreSessionTally};

use crate::error::ApiResult;
use crate::main_lib::AppState;

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthReport>> {
    Ok(Json(state.health_service.health()?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatsResponse {
    pub server_instance_id: String,
    pub events_count: i64,
    pub latest_hlc: Option<String>,
    pub restore_sessions: RestoreSessionTally,
    pub exports_served: u64,
}

/// GET /stats
pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatsResponse>> {
    let health = state.health_service.health()?;
    let restore_sessions = state.sessions.status_counts()?;
    let latest_hlc = state.events.latest_hlc()?.map(|hlc| hlc.encode());

    Ok(Json(StatsResponse {
        server_instance_id: health.server_instance_id,
        events_count: health.events_count,
        latest_hlc,
        restore_sessions,
        exports_served: state.exports_served.load(Ordering::Relaxed),
    }))
}
