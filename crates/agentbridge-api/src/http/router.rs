//! Axum router configuration with middleware.
//!
//! REST routes are under `/api/v1/`; the agent wire protocol is at `/ws`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::hub::health))
        .route("/metrics", get(handlers::hub::metrics))
        .route("/clients", get(handlers::client::list_clients))
        .route("/clients/{id}", delete(handlers::client::disconnect_client))
        .route("/history", get(handlers::envelope::history))
        .route("/envelopes", post(handlers::envelope::submit));

    Router::new()
        .route("/ws", get(handlers::ws::ws_handler))
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
