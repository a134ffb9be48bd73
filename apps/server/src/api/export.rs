//! Export endpoint: paginated, cursor-based slices of the event log.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use lifeboat_core::clock::Hlc;
use lifeboat_core::export::{ExportPage, ExportRequest};

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub entity_type: Option<String>,
    pub since_cursor: Option<String>,
    pub limit: Option<i64>,
    pub include_snapshot: Option<bool>,
}

/// GET /export?entity_type=&since_cursor=&limit=&include_snapshot=
pub async fn export(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportParams>,
) -> ApiResult<Json<ExportPage>> {
    let since_cursor = params
        .since_cursor
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(Hlc::parse)
        .transpose()
        .map_err(ApiError::from)?;
    let request = ExportRequest {
        entity_type: params.entity_type.filter(|value| !value.is_empty()),
        since_cursor,
        limit: params.limit,
        include_snapshot: params.include_snapshot.unwrap_or(false),
    };
    debug!(
        "export: entity_type={:?} since_cursor={:?} limit={:?} include_snapshot={}",
        request.entity_type,
        request.since_cursor,
        request.limit,
        request.include_snapshot
    );

    let page = state.export_service.export(&request)?;
    state.exports_served.fetch_add(1, Ordering::Relaxed);
    Ok(Json(page))
}
