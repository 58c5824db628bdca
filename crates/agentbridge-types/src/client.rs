//! Connected-client domain types.
//!
//! `ClientMetadata` is owned exclusively by the connection registry; the rest
//! of the system only ever sees cloned snapshots of it.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default concurrent-task capacity advertised by a client that omits it.
pub const DEFAULT_MAX_CONCURRENT_TASKS: u32 = 1;

/// Per-connection lifecycle state.
///
/// `Connecting -> Registered -> (Active <-> Idle) -> Disconnected`.
/// `Active`/`Idle` is derived from `last_seen` recency and never gates delivery.
/// `Disconnected` is terminal; a new connection with the same id starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Registered,
    Active,
    Idle,
    Disconnected,
}

impl ConnectionState {
    /// Whether the connection can still receive deliveries.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Registered | Self::Active | Self::Idle)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Metadata tracked for one connected agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    pub id: String,
    pub role: String,
    pub labels: BTreeSet<String>,
    pub tools: BTreeSet<String>,
    pub intents: BTreeSet<String>,
    pub max_concurrent_tasks: u32,
    /// Last time anything was heard from (or successfully sent to) the client.
    pub last_seen: DateTime<Utc>,
    /// Envelopes received from plus delivered to this client.
    pub message_count: u64,
    /// Failed deliveries to this client's connection.
    pub error_count: u64,
    pub connection_time: DateTime<Utc>,
    pub state: ConnectionState,
}

impl ClientMetadata {
    /// Build fresh metadata from an accepted registration request.
    pub fn from_request(request: &RegistrationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: request.client_id.clone(),
            role: request.role.clone(),
            labels: request.labels.clone(),
            tools: request.tools.clone(),
            intents: request.intents.clone(),
            max_concurrent_tasks: request
                .max_concurrent_tasks
                .unwrap_or(DEFAULT_MAX_CONCURRENT_TASKS),
            last_seen: now,
            message_count: 0,
            error_count: 0,
            connection_time: now,
            state: ConnectionState::Registered,
        }
    }
}

/// A client's registration handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub client_id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub tools: BTreeSet<String>,
    #[serde(default)]
    pub intents: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<u32>,
}

impl RegistrationRequest {
    /// Convenience constructor used by tests and the HTTP layer.
    pub fn new(client_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            role: role.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_request_applies_defaults() {
        let now = Utc::now();
        let mut req = RegistrationRequest::new("coder", "worker");
        req.labels.insert("rust".to_string());

        let meta = ClientMetadata::from_request(&req, now);
        assert_eq!(meta.id, "coder");
        assert_eq!(meta.max_concurrent_tasks, DEFAULT_MAX_CONCURRENT_TASKS);
        assert_eq!(meta.state, ConnectionState::Registered);
        assert_eq!(meta.connection_time, now);
        assert!(meta.labels.contains("rust"));
    }

    #[test]
    fn registration_request_accepts_camel_case() {
        let req: RegistrationRequest = serde_json::from_str(
            r#"{"clientId":"a","role":"r","tools":["grep"],"maxConcurrentTasks":4}"#,
        )
        .unwrap();
        assert_eq!(req.client_id, "a");
        assert_eq!(req.max_concurrent_tasks, Some(4));
        assert!(req.tools.contains("grep"));
        assert!(req.intents.is_empty());
    }

    #[test]
    fn live_states() {
        assert!(ConnectionState::Active.is_live());
        assert!(ConnectionState::Idle.is_live());
        assert!(!ConnectionState::Connecting.is_live());
        assert!(!ConnectionState::Disconnected.is_live());
    }
}
