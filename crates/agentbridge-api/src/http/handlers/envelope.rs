//! Envelope submission and history.
//!
//! GET  /api/v1/history?limit&agentId&taskId&intent
//! POST /api/v1/envelopes?allowQueue=

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use serde_json::Value;

use agentbridge_types::envelope::Envelope;

use crate::http::error::AppError;
use crate::http::extractors::query::{HistoryQuery, SubmitQuery};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/history
///
/// Most recent matching envelopes, oldest first.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<Arc<Envelope>>>>, AppError> {
    let start = Instant::now();
    let envelopes = state.hub.history(query.into_filter()).await?;
    Ok(Json(ApiResponse::timed(envelopes, start)))
}

/// POST /api/v1/envelopes
///
/// Broadcasts when `to` is absent, otherwise sends direct. With
/// `allowQueue=false` an offline recipient is a 404 instead of a queued send.
/// Returns the enriched envelope.
pub async fn submit(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    Json(raw): Json<Value>,
) -> Result<Json<ApiResponse<Arc<Envelope>>>, AppError> {
    let start = Instant::now();
    if !raw.is_object() {
        return Err(AppError::Validation("request body must be a JSON object".to_string()));
    }
    let envelope = state.hub.submit(raw, None, query.allow_queue).await?;
    tracing::debug!(envelope_id = %envelope.id, to = ?envelope.to, "envelope submitted via API");
    Ok(Json(ApiResponse::timed(envelope, start)))
}
