//! Connected client endpoints.
//!
//! GET    /api/v1/clients      - registered clients, sorted by id.
//! DELETE /api/v1/clients/{id} - force-unregister a client.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};

use agentbridge_types::client::ClientMetadata;

use crate::http::error::AppError;
use crate::http::extractors::query::DisconnectQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/clients
pub async fn list_clients(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<ClientMetadata>>>, AppError> {
    let start = Instant::now();
    let clients = state.hub.clients().await?;
    Ok(Json(ApiResponse::timed(clients, start)))
}

/// DELETE /api/v1/clients/{id}?permanent=
///
/// With `permanent=true` the client's offline queue is dropped as well.
pub async fn disconnect_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DisconnectQuery>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    if !state.hub.disconnect(&id, None, query.permanent).await? {
        return Err(AppError::NotFound(format!("client '{id}' is not registered")));
    }
    tracing::info!(client_id = %id, permanent = query.permanent, "client disconnected via API");
    Ok(Json(ApiResponse::timed(
        json!({"clientId": id, "permanent": query.permanent}),
        start,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbridge_core::registry::ConnectionHandle;
    use agentbridge_types::client::RegistrationRequest;

    use crate::http::handlers::test_support;

    #[tokio::test]
    async fn lists_and_disconnects_clients() {
        let state = test_support::state();
        let (handle, _rx) = ConnectionHandle::channel(8);
        state
            .hub
            .register(handle, RegistrationRequest::new("coder", "worker"))
            .await
            .unwrap();

        let Json(body) = list_clients(State(state.clone())).await.unwrap();
        let clients = body.data.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].id, "coder");

        disconnect_client(
            State(state.clone()),
            Path("coder".to_string()),
            Query(DisconnectQuery { permanent: true }),
        )
        .await
        .unwrap();

        let err = disconnect_client(State(state), Path("coder".to_string()), Query(DisconnectQuery::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
