//! Enrichment of raw, envelope-shaped JSON into canonical [`Envelope`]s.
//!
//! Enrichment is lenient: any optional field that is missing or has the wrong
//! shape gets its default. The only rejections are a non-object input, a
//! payload that cannot be serialized, and a payload above the hard size
//! ceiling. Enriching an already complete envelope returns it unchanged.

use std::sync::Arc;

use agentbridge_types::envelope::{DEFAULT_CHANNEL, DEFAULT_INTENT, Envelope, Priority, UNKNOWN_SENDER};
use agentbridge_types::error::EnrichmentError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::history::Weighted;

/// Fixed per-envelope overhead added to the payload size when estimating
/// retained bytes.
const ENVELOPE_OVERHEAD: usize = 256;

/// An accepted envelope together with its estimated retained size.
#[derive(Debug, Clone)]
pub struct TrackedEnvelope {
    pub envelope: Arc<Envelope>,
    /// Serialized payload length.
    pub payload_bytes: usize,
    size: usize,
}

impl TrackedEnvelope {
    pub fn new(envelope: Envelope, payload_bytes: usize) -> Self {
        let size = ENVELOPE_OVERHEAD
            + payload_bytes
            + envelope.id.len()
            + envelope.intent.len()
            + envelope.from.len()
            + envelope.role.len()
            + envelope.to.as_ref().map_or(0, String::len);
        Self {
            envelope: Arc::new(envelope),
            payload_bytes,
            size,
        }
    }
}

impl Weighted for TrackedEnvelope {
    fn weight(&self) -> usize {
        self.size
    }
}

/// Inputs enrichment needs from the control plane.
pub struct EnrichContext<'a> {
    /// Registered id of the submitting connection, if any.
    pub sender: Option<&'a str>,
    /// Registered role of a client id.
    pub role_of: &'a dyn Fn(&str) -> Option<String>,
    pub max_payload_bytes: usize,
    pub now: DateTime<Utc>,
}

/// Serialized length of `payload`, written into a reusable scratch buffer.
pub fn payload_size(payload: &Value, scratch: &mut Vec<u8>) -> Result<usize, serde_json::Error> {
    scratch.clear();
    serde_json::to_writer(&mut *scratch, payload)?;
    Ok(scratch.len())
}

/// Fill every gap in `raw` and measure the payload.
pub fn enrich(raw: Value, ctx: &EnrichContext<'_>, scratch: &mut Vec<u8>) -> Result<TrackedEnvelope, EnrichmentError> {
    let mut obj = match raw {
        Value::Object(map) => map,
        other => return Err(EnrichmentError::NotAnObject(type_name(&other))),
    };

    let id = take_string(&mut obj, "id", None).unwrap_or_else(|| Uuid::now_v7().to_string());
    let timestamp = take_string(&mut obj, "timestamp", None)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(ctx.now);
    let intent = take_string(&mut obj, "intent", None).unwrap_or_else(|| DEFAULT_INTENT.to_string());
    let task_id = take_string(&mut obj, "taskId", Some("task_id"));
    let channel = take_string(&mut obj, "channel", None).unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
    let priority = take_string(&mut obj, "priority", None)
        .and_then(|p| Priority::parse(&p))
        .unwrap_or_default();
    let from = take_string(&mut obj, "from", None)
        .or_else(|| ctx.sender.map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
    let role = take_string(&mut obj, "role", None)
        .or_else(|| (ctx.role_of)(&from))
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
    let to = take_string(&mut obj, "to", None);
    let reply_to = take_string(&mut obj, "replyTo", Some("reply_to"));
    let context = take_object(&mut obj, "context");
    let trace = take_object(&mut obj, "trace");
    let tools = take_array(&mut obj, "tools");
    let attachments = take_array(&mut obj, "attachments");
    let payload = match obj.remove("payload") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(value) => value,
    };

    let payload_bytes = payload_size(&payload, scratch)?;
    if payload_bytes > ctx.max_payload_bytes {
        return Err(EnrichmentError::PayloadTooLarge {
            size: payload_bytes,
            limit: ctx.max_payload_bytes,
        });
    }

    let envelope = Envelope {
        id,
        timestamp,
        intent,
        task_id,
        channel,
        priority,
        from,
        role,
        to,
        reply_to,
        context,
        payload,
        tools,
        attachments,
        trace,
    };
    Ok(TrackedEnvelope::new(envelope, payload_bytes))
}

/// Remove a non-empty string field, accepting an alternate key.
fn take_string(obj: &mut Map<String, Value>, key: &str, alias: Option<&str>) -> Option<String> {
    let value = obj
        .remove(key)
        .filter(|v| !v.is_null())
        .or_else(|| alias.and_then(|a| obj.remove(a)))?;
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

fn take_object(obj: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match obj.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn take_array(obj: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match obj.remove(key) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// A fully enriched envelope with the given id and recipient.
    pub(crate) fn tracked(id: &str, to: Option<&str>) -> TrackedEnvelope {
        let mut raw = json!({"id": id, "from": "a", "payload": {"n": id}});
        if let Some(to) = to {
            raw["to"] = json!(to);
        }
        enrich(raw, &context(None), &mut Vec::new()).unwrap()
    }

    fn no_roles(_: &str) -> Option<String> {
        None
    }

    fn worker_role(id: &str) -> Option<String> {
        (id == "coder").then(|| "worker".to_string())
    }

    fn context(sender: Option<&str>) -> EnrichContext<'_> {
        EnrichContext {
            sender,
            role_of: &no_roles,
            max_payload_bytes: 1024,
            now: Utc::now(),
        }
    }

    #[test]
    fn fills_defaults() {
        let ctx = EnrichContext {
            role_of: &worker_role,
            ..context(Some("coder"))
        };
        let tracked = enrich(json!({"payload": {"text": "hi"}}), &ctx, &mut Vec::new()).unwrap();
        let env = &tracked.envelope;

        assert!(Uuid::parse_str(&env.id).is_ok());
        assert_eq!(env.timestamp, ctx.now);
        assert_eq!(env.intent, DEFAULT_INTENT);
        assert_eq!(env.channel, DEFAULT_CHANNEL);
        assert_eq!(env.priority, Priority::Normal);
        assert_eq!(env.from, "coder");
        assert_eq!(env.role, "worker");
        assert!(env.is_broadcast());
        assert!(env.context.is_empty());
        assert!(env.tools.is_empty());
        assert_eq!(tracked.payload_bytes, r#"{"text":"hi"}"#.len());
    }

    #[test]
    fn malformed_optional_fields_fall_back() {
        let raw = json!({
            "from": 42,
            "priority": "urgent",
            "timestamp": "yesterday",
            "context": "nope",
            "tools": {"not": "an array"},
            "to": "",
            "task_id": "t-1",
            "payload": null,
        });
        let ctx = context(None);
        let env = enrich(raw, &ctx, &mut Vec::new()).unwrap().envelope;
        assert_eq!(env.from, UNKNOWN_SENDER);
        assert_eq!(env.role, UNKNOWN_SENDER);
        assert_eq!(env.priority, Priority::Normal);
        assert_eq!(env.timestamp, ctx.now);
        assert!(env.context.is_empty());
        assert!(env.tools.is_empty());
        assert!(env.to.is_none());
        assert_eq!(env.task_id.as_deref(), Some("t-1"));
        assert_eq!(env.payload, json!({}));
    }

    #[test]
    fn enrichment_is_idempotent_on_complete_input() {
        let first = enrich(
            json!({
                "intent": "code.review",
                "taskId": "t-9",
                "priority": "high",
                "from": "planner",
                "role": "orchestrator",
                "to": "coder",
                "replyTo": "planner",
                "context": {"repo": "x"},
                "payload": {"diff": "..."},
                "tools": ["grep"],
                "attachments": [{"name": "a.txt"}],
                "trace": {"hop": 1},
            }),
            &context(None),
            &mut Vec::new(),
        )
        .unwrap();

        let raw = serde_json::to_value(first.envelope.as_ref()).unwrap();
        let second = enrich(raw, &context(Some("someone-else")), &mut Vec::new()).unwrap();
        assert_eq!(*first.envelope, *second.envelope);
        assert_eq!(first.payload_bytes, second.payload_bytes);
    }

    #[test]
    fn rejects_non_objects_and_oversized_payloads() {
        let err = enrich(json!([1, 2]), &context(None), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, EnrichmentError::NotAnObject("array")));

        let big = "x".repeat(2048);
        let err = enrich(json!({"payload": big}), &context(None), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, EnrichmentError::PayloadTooLarge { limit: 1024, .. }));
    }

    #[test]
    fn scratch_buffer_is_reused() {
        let mut scratch = Vec::with_capacity(64);
        payload_size(&json!({"a": 1}), &mut scratch).unwrap();
        let len = payload_size(&json!("b"), &mut scratch).unwrap();
        assert_eq!(len, 3);
        assert_eq!(scratch, b"\"b\"");
    }
}
