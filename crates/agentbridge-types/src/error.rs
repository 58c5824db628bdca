use std::time::Duration;

use thiserror::Error;

/// Errors raised by the registration handshake.
///
/// Recoverable: reported to the connecting client, the connection stays open
/// for a retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("connection limit of {limit} reached")]
    CapacityExceeded { limit: usize },

    #[error("malformed registration: {0}")]
    Malformed(String),
}

/// Errors raised while enriching a raw message into an envelope.
///
/// Only the offending envelope is dropped; other traffic is unaffected.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("envelope must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("payload cannot be serialized: {0}")]
    Unserializable(#[from] serde_json::Error),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// Why a single delivery attempt to a connection failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("client '{0}' is not connected")]
    NotConnected(String),

    #[error("outbound queue full for client '{0}'")]
    ChannelFull(String),

    #[error("connection closed for client '{0}'")]
    ChannelClosed(String),
}

/// Errors returned by the worker offload pool.
///
/// Each error is isolated to the task that produced it; the pool heals itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffloadError {
    #[error("task timed out after {0:?}")]
    TaskTimeout(Duration),

    #[error("worker crashed: {0}")]
    WorkerCrash(String),

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("offload queue is full ({0} tasks waiting)")]
    QueueFull(usize),

    #[error("worker pool is shutting down")]
    ShuttingDown,
}

/// Errors surfaced by the hub to its callers.
#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),

    /// A required-recipient send (queueing disabled) could not be delivered.
    #[error("recipient unreachable: {0}")]
    RecipientUnreachable(#[source] DeliveryError),

    /// The control-plane loop has stopped.
    #[error("hub is not running")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_error_display() {
        let err = RegistrationError::CapacityExceeded { limit: 2 };
        assert_eq!(err.to_string(), "connection limit of 2 reached");
    }

    #[test]
    fn hub_error_is_transparent_over_registration() {
        let err: HubError = RegistrationError::Malformed("empty clientId".to_string()).into();
        assert_eq!(err.to_string(), "malformed registration: empty clientId");
    }

    #[test]
    fn offload_timeout_display() {
        let err = OffloadError::TaskTimeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "task timed out after 250ms");
    }

    #[test]
    fn unreachable_wraps_delivery_error() {
        let err = HubError::RecipientUnreachable(DeliveryError::NotConnected("b".to_string()));
        assert!(err.to_string().contains("'b' is not connected"));
    }
}
