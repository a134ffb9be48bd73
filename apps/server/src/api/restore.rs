//! Restore endpoints: privileged batch ingestion and session status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use sha2::{Digest, Sha256};
use tracing::info;

use lifeboat_core::restore::{
    ApplyBatchRequest, BatchOutcome, RestoreSession, RestoreSessionStore,
};

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

/// Header carrying the operator credential. Restore is a rare,
/// high-blast-radius operation and requires a credential distinct from
/// normal API access.
pub const OPERATOR_PIN_HEADER: &str = "x-operator-pin";

fn credential_matches(provided: &str, expected: &str) -> bool {
    // Digest comparison avoids early-exit string comparison on the secret.
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

fn require_operator_pin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.config.operator_pin.as_deref() else {
        return Err(ApiError::Unauthorized(
            "restore is disabled: no operator credential is configured".to_string(),
        ));
    };
    let provided = headers
        .get(OPERATOR_PIN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !credential_matches(provided, expected) {
        return Err(ApiError::Unauthorized(
            "invalid operator credential".to_string(),
        ));
    }
    Ok(())
}

/// POST /restore (header: operator credential)
pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ApplyBatchRequest>,
) -> ApiResult<Json<BatchOutcome>> {
    require_operator_pin(&state, &headers)?;
    info!(
        "restore: session '{}' batch {}/{} from device '{}' ({} event(s))",
        request.restore_session_id,
        request.batch_number,
        request.total_batches,
        request.source_device_id,
        request.events.len()
    );

    let outcome = state.restore_engine.apply_batch(request).await?;
    Ok(Json(outcome))
}

/// GET /restore/{session_id}/status
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<RestoreSession>> {
    let session = state
        .sessions
        .get(&session_id)?
        .ok_or_else(|| ApiError::NotFound(format!("restore session '{session_id}' not found")))?;
    Ok(Json(session))
}

#[cfg(test)]
mod tests {
    use super::credential_matches;

    #[test]
    fn credential_comparison_is_exact() {
        assert!(credential_matches("2468", "2468"));
        assert!(!credential_matches("2469", "2468"));
        assert!(!credential_matches("", "2468"));
    }
}
