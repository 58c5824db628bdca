//! WebSocket wire protocol: one JSON object per text frame.
//!
//! Inbound frames are [`ClientFrame`]s, outbound frames are [`ServerFrame`]s.
//! Both are internally tagged on `"type"`.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::{ClientMetadata, RegistrationRequest};
use crate::envelope::Envelope;

/// A frame sent by a connected agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Registration handshake. Must precede any envelope.
    #[serde(rename_all = "camelCase")]
    Register {
        client_id: String,
        #[serde(default)]
        role: String,
        #[serde(default)]
        labels: BTreeSet<String>,
        #[serde(default)]
        tools: BTreeSet<String>,
        #[serde(default)]
        intents: BTreeSet<String>,
        #[serde(default)]
        max_concurrent_tasks: Option<u32>,
    },
    /// An envelope-shaped object; enrichment fills the gaps.
    Envelope { envelope: serde_json::Value },
    /// Liveness signal. Answered with `heartbeat_ack`.
    Heartbeat,
}

impl ClientFrame {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Turn a `register` frame into a registration request.
    pub fn into_registration(self) -> Option<RegistrationRequest> {
        match self {
            Self::Register {
                client_id,
                role,
                labels,
                tools,
                intents,
                max_concurrent_tasks,
            } => Some(RegistrationRequest {
                client_id,
                role,
                labels,
                tools,
                intents,
                max_concurrent_tasks,
            }),
            _ => None,
        }
    }
}

/// A frame sent by the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Registration accepted, with recent history for catch-up.
    Registered {
        client: ClientMetadata,
        history: Vec<Arc<Envelope>>,
    },
    /// A request from this connection was rejected.
    Error { message: String },
    HeartbeatAck,
    /// Liveness probe sent by the heartbeat cycle to silent clients.
    Ping,
    /// A single delivered envelope.
    Envelope { envelope: Arc<Envelope> },
    /// Offline-queue flush on reconnect.
    Batch { envelopes: Vec<Arc<Envelope>> },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Number of envelopes this frame carries.
    pub fn envelope_count(&self) -> usize {
        match self {
            Self::Envelope { .. } => 1,
            Self::Batch { envelopes } => envelopes.len(),
            _ => 0,
        }
    }

    /// Serialize to the text frame payload.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register_frame() {
        let frame = ClientFrame::parse(
            r#"{"type":"register","clientId":"coder","role":"worker","labels":["rust"]}"#,
        )
        .unwrap();
        let req = frame.into_registration().unwrap();
        assert_eq!(req.client_id, "coder");
        assert_eq!(req.role, "worker");
        assert!(req.labels.contains("rust"));
        assert_eq!(req.max_concurrent_tasks, None);
    }

    #[test]
    fn parses_envelope_and_heartbeat_frames() {
        let frame = ClientFrame::parse(r#"{"type":"envelope","envelope":{"to":"b","payload":{"text":"1"}}}"#).unwrap();
        match frame {
            ClientFrame::Envelope { envelope } => assert_eq!(envelope["to"], "b"),
            other => panic!("unexpected frame: {other:?}"),
        }

        let frame = ClientFrame::parse(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Heartbeat));
        assert!(frame.into_registration().is_none());
    }

    #[test]
    fn rejects_unknown_frame_type() {
        assert!(ClientFrame::parse(r#"{"type":"subscribe"}"#).is_err());
        assert!(ClientFrame::parse("not json").is_err());
    }

    #[test]
    fn server_frames_use_snake_case_tags() {
        let text = ServerFrame::HeartbeatAck.to_text().unwrap();
        assert_eq!(text, r#"{"type":"heartbeat_ack"}"#);

        let text = ServerFrame::error("capacity exceeded").to_text().unwrap();
        assert!(text.contains(r#""type":"error""#));
        assert!(text.contains("capacity exceeded"));

        let batch = ServerFrame::Batch { envelopes: Vec::new() };
        assert_eq!(batch.envelope_count(), 0);
        assert!(batch.to_text().unwrap().contains(r#""envelopes":[]"#));
    }
}
