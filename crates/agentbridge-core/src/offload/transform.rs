//! CPU-heavy payload transforms run on the offload pool.

use std::fmt;
use std::sync::Arc;

use agentbridge_types::envelope::Envelope;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use super::task::OffloadTask;

/// Intent that selects [`TransformKind::Digest`].
pub const DIGEST_INTENT: &str = "payload.digest";

/// A transform applied to a heavy envelope's payload before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// Strip `null` members recursively.
    Compact,
    /// Attach a SHA-256 digest and byte length of the payload.
    Digest,
}

impl TransformKind {
    pub fn for_intent(intent: &str) -> Self {
        if intent == DIGEST_INTENT { Self::Digest } else { Self::Compact }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Digest => "digest",
        }
    }

    /// Apply the transform. Runs on an execution unit, never on the control plane.
    pub fn apply(&self, payload: Value) -> Result<Value, String> {
        match self {
            Self::Compact => Ok(compact(payload)),
            Self::Digest => digest(payload),
        }
    }

    /// Package the transform of an accepted envelope's payload as an offload
    /// task. The payload is copied on the execution unit.
    pub fn task(self, envelope: Arc<Envelope>) -> OffloadTask {
        let label = format!("{}:{}", self.as_str(), envelope.id);
        OffloadTask::new(label, move || self.apply(envelope.payload.clone()))
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn compact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, compact(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(compact).collect()),
        other => other,
    }
}

fn digest(payload: Value) -> Result<Value, String> {
    let bytes = serde_json::to_vec(&payload).map_err(|e| e.to_string())?;
    let hex = Sha256::digest(&bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    let summary = json!({
        "algorithm": "sha256",
        "hex": hex,
        "bytes": bytes.len(),
    });

    let mut object = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    object.insert("_digest".to_string(), summary);
    Ok(Value::Object(object))
}
