//! Application error type mapping to HTTP status codes and the response envelope.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use agentbridge_types::error::{HubError, RegistrationError};

use crate::http::response::{ApiResponse, new_request_id};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors surfaced by the hub loop.
    Hub(HubError),
    /// Resource not found.
    NotFound(String),
    /// Validation error.
    Validation(String),
}

impl From<HubError> for AppError {
    fn from(e: HubError) -> Self {
        AppError::Hub(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Hub(HubError::Registration(e @ RegistrationError::CapacityExceeded { .. })) => {
                (StatusCode::CONFLICT, "CAPACITY_EXCEEDED", e.to_string())
            }
            AppError::Hub(HubError::Registration(e @ RegistrationError::Malformed(_))) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
            }
            AppError::Hub(HubError::Enrichment(e)) => (StatusCode::BAD_REQUEST, "INVALID_ENVELOPE", e.to_string()),
            AppError::Hub(e @ HubError::RecipientUnreachable(_)) => {
                (StatusCode::NOT_FOUND, "RECIPIENT_UNREACHABLE", e.to_string())
            }
            AppError::Hub(e @ HubError::Unavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "HUB_UNAVAILABLE", e.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::warn!(code, %message, "request failed");
        }
        let body = ApiResponse::error(code, &message, new_request_id(), 0);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbridge_types::error::{DeliveryError, EnrichmentError};

    fn status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn hub_errors_map_to_status_codes() {
        assert_eq!(
            status(HubError::from(RegistrationError::CapacityExceeded { limit: 4 }).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(HubError::from(RegistrationError::Malformed("empty id".into())).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(HubError::from(EnrichmentError::NotAnObject("array")).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(HubError::RecipientUnreachable(DeliveryError::NotConnected("b".into())).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status(HubError::Unavailable.into()), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(AppError::NotFound("x".into())), StatusCode::NOT_FOUND);
    }
}
