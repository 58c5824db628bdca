//! Observer events published by the hub.
//!
//! `HubEvent` feeds metrics and logging subscribers only. Nothing on the
//! routing path waits on or reacts to these events.

use serde::{Deserialize, Serialize};

use crate::metrics::PressureLevel;

/// Why a client left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnregisterReason {
    /// The connection closed or the client asked to leave.
    Disconnected,
    /// Silent for two heartbeat intervals.
    HeartbeatTimeout,
    /// Idle past the stale threshold with a closed connection.
    Stale,
    /// A newer connection registered with the same id.
    Replaced,
}

/// Events emitted by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    ClientRegistered { client_id: String, flushed: usize },
    ClientUnregistered { client_id: String, reason: UnregisterReason },
    /// An envelope was rejected or discarded.
    EnvelopeDropped { envelope_id: Option<String>, reason: String },
    DeliveryFailed { client_id: String, error: String },
    /// Offloaded transform failed; the untransformed payload was delivered.
    OffloadDegraded { envelope_id: String, error: String },
    PressureChanged { from: PressureLevel, to: PressureLevel },
    MemoryCritical { heap_ratio: f64, resident_ratio: f64 },
    LeakSuspected { rate_bytes_per_min: f64 },
    CollectionPerformed { reason: String, reclaimed_objects: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged() {
        let event = HubEvent::ClientUnregistered {
            client_id: "a".to_string(),
            reason: UnregisterReason::HeartbeatTimeout,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "client_unregistered");
        assert_eq!(json["reason"], "heartbeat_timeout");
    }
}
