//! HTTP and WebSocket surface for agentbridge.
//!
//! Axum router with the agent wire protocol at `/ws` and the collaborator
//! REST API at `/api/v1/`, using the `{data, meta, errors}` response format
//! and CORS support.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
