//! HTTP routing for the Lifeboat boundary.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::main_lib::AppState;

pub mod export;
pub mod health;
pub mod restore;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/export", get(export::export))
        .route("/restore", post(restore::submit_batch))
        .route("/restore/{session_id}/status", get(restore::session_status))
        .route("/health", get(health::health))
        .route("/stats", get(health::stats))
}
