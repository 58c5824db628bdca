//! The canonical message unit routed by the hub.
//!
//! An [`Envelope`] is always fully enriched: every field that has a default
//! carries it. Raw inbound messages are plain JSON objects and only become an
//! `Envelope` after passing through enrichment in `agentbridge-core`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Intent used when a raw message does not carry one.
pub const DEFAULT_INTENT: &str = "agent.message";

/// Channel used when a raw message does not carry one.
pub const DEFAULT_CHANNEL: &str = "default";

/// Sender id and role used when neither the message nor the connection supply one.
pub const UNKNOWN_SENDER: &str = "unknown";

/// Delivery priority carried by an envelope.
///
/// Priority is informational for routing (delivery stays FIFO per recipient)
/// but it orders offload tasks inside the worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Lenient parse used during enrichment. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A fully enriched message.
///
/// Envelopes are immutable once recorded in history. The hub shares them as
/// `Arc<Envelope>` between the history buffer, offline queues, and outbound
/// connection queues; a changed view is always a new envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique message id (UUIDv7 when generated by the hub).
    pub id: String,
    /// Creation time; generated on enrichment when absent.
    pub timestamp: DateTime<Utc>,
    /// Free-form intent tag, e.g. `agent.message` or `task.assign`.
    pub intent: String,
    /// Optional correlation key linking envelopes of one task.
    pub task_id: Option<String>,
    pub channel: String,
    pub priority: Priority,
    /// Sender id.
    pub from: String,
    /// Sender role, resolved from the registry when the message omits it.
    pub role: String,
    /// Recipient id. `None` means broadcast.
    pub to: Option<String>,
    pub reply_to: Option<String>,
    pub context: Map<String, Value>,
    pub payload: Value,
    pub tools: Vec<Value>,
    pub attachments: Vec<Value>,
    pub trace: Map<String, Value>,
}

impl Envelope {
    /// Whether this envelope is addressed to every connected client.
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// Return a copy carrying a different payload and an extra trace entry.
    ///
    /// Used for the delivered view of an offloaded envelope; the recorded
    /// envelope is left untouched.
    pub fn with_transformed_payload(&self, payload: Value, trace_key: &str, trace: Value) -> Self {
        let mut next = self.clone();
        next.payload = payload;
        next.trace.insert(trace_key.to_string(), trace);
        next
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Envelope {
        Envelope {
            id: "env-1".to_string(),
            timestamp: Utc::now(),
            intent: DEFAULT_INTENT.to_string(),
            task_id: Some("task-9".to_string()),
            channel: DEFAULT_CHANNEL.to_string(),
            priority: Priority::High,
            from: "planner".to_string(),
            role: "orchestrator".to_string(),
            to: Some("coder".to_string()),
            reply_to: None,
            context: Map::new(),
            payload: json!({"text": "hello"}),
            tools: Vec::new(),
            attachments: Vec::new(),
            trace: Map::new(),
        }
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["taskId"], "task-9");
        assert_eq!(json["priority"], "high");
        assert!(json.get("replyTo").is_some());
        assert!(json.get("task_id").is_none());
    }

    #[test]
    fn broadcast_is_absent_recipient() {
        let mut env = sample();
        assert!(!env.is_broadcast());
        env.to = None;
        assert!(env.is_broadcast());
    }

    #[test]
    fn transformed_copy_leaves_original_untouched() {
        let env = sample();
        let next = env.with_transformed_payload(json!({"text": "HELLO"}), "offload", json!({"transform": "compact"}));
        assert_eq!(env.payload["text"], "hello");
        assert!(env.trace.is_empty());
        assert_eq!(next.payload["text"], "HELLO");
        assert_eq!(next.trace["offload"]["transform"], "compact");
        assert_eq!(next.id, env.id);
    }

    #[test]
    fn priority_parse_is_lenient() {
        assert_eq!(Priority::parse("HIGH"), Some(Priority::High));
        assert_eq!(Priority::parse(" normal "), Some(Priority::Normal));
        assert_eq!(Priority::parse("urgent"), None);
    }
}
