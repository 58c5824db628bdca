//! Connection registry: one [`ClientMetadata`] per live connection.
//!
//! The registry owns client metadata exclusively and holds the outbound
//! handle of each connection. Sends never block: a full or closed outbound
//! channel is a delivery failure counted against the client, never an error
//! for the hub.

use std::collections::HashMap;

use agentbridge_types::client::{ClientMetadata, ConnectionState, RegistrationRequest};
use agentbridge_types::error::{DeliveryError, RegistrationError};
use agentbridge_types::wire::ServerFrame;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Outbound side of one transport connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Distinguishes successive connections that bind the same client id.
    pub id: Uuid,
    outbound: mpsc::Sender<ServerFrame>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id: Uuid::now_v7(),
            outbound,
        }
    }

    /// Create a handle and the receiver the transport drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[derive(Debug)]
struct Entry {
    meta: ClientMetadata,
    handle: ConnectionHandle,
    /// Last inbound traffic; drives heartbeat liveness.
    heard: Instant,
}

/// Heartbeat classification of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Fresh,
    /// Silent for at least one interval.
    Silent,
    /// Silent for at least two intervals.
    Expired,
}

/// Registered clients keyed by id.
#[derive(Debug)]
pub struct ConnectionRegistry {
    clients: HashMap<String, Entry>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_connections,
        }
    }

    /// Bind `request.client_id` to `handle`.
    ///
    /// Re-registering an id replaces the prior binding and returns its handle.
    /// A new id beyond the connection ceiling fails with `CapacityExceeded`.
    pub fn register(
        &mut self,
        handle: ConnectionHandle,
        request: &RegistrationRequest,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<(ClientMetadata, Option<ConnectionHandle>), RegistrationError> {
        let id = request.client_id.trim();
        if id.is_empty() {
            return Err(RegistrationError::Malformed("clientId must not be empty".to_string()));
        }
        if !self.clients.contains_key(id) && self.clients.len() >= self.max_connections {
            return Err(RegistrationError::CapacityExceeded {
                limit: self.max_connections,
            });
        }

        let mut meta = ClientMetadata::from_request(request, wall);
        meta.id = id.to_string();
        let replaced = self
            .clients
            .insert(
                meta.id.clone(),
                Entry {
                    meta: meta.clone(),
                    handle,
                    heard: now,
                },
            )
            .map(|old| old.handle);
        Ok((meta, replaced))
    }

    /// Remove a client. With `connection`, only if it is still bound to that
    /// connection; a stale disconnect after re-registration is ignored.
    pub fn unregister(&mut self, client_id: &str, connection: Option<Uuid>) -> Option<ClientMetadata> {
        let current = self.clients.get(client_id)?;
        if connection.is_some_and(|conn| conn != current.handle.id) {
            return None;
        }
        self.clients.remove(client_id).map(|entry| {
            let mut meta = entry.meta;
            meta.state = ConnectionState::Disconnected;
            meta
        })
    }

    /// Mark inbound traffic from a client.
    pub fn touch(&mut self, client_id: &str, now: Instant, wall: DateTime<Utc>) -> bool {
        match self.clients.get_mut(client_id) {
            Some(entry) => {
                entry.heard = now;
                entry.meta.last_seen = wall;
                if entry.meta.state == ConnectionState::Idle || entry.meta.state == ConnectionState::Registered {
                    entry.meta.state = ConnectionState::Active;
                }
                true
            }
            None => false,
        }
    }

    /// Count one inbound message and mark the client as heard.
    pub fn record_inbound(&mut self, client_id: &str, now: Instant, wall: DateTime<Utc>) {
        if self.touch(client_id, now, wall) {
            if let Some(entry) = self.clients.get_mut(client_id) {
                entry.meta.message_count += 1;
            }
        }
    }

    /// Send a frame without waiting.
    ///
    /// Success updates `last_seen` and counts every envelope the frame
    /// carries; failure increments `error_count`.
    pub fn deliver(&mut self, client_id: &str, frame: ServerFrame, wall: DateTime<Utc>) -> Result<(), DeliveryError> {
        let entry = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| DeliveryError::NotConnected(client_id.to_string()))?;

        let carried = frame.envelope_count() as u64;
        match entry.handle.outbound.try_send(frame) {
            Ok(()) => {
                entry.meta.last_seen = wall;
                entry.meta.message_count += carried;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                entry.meta.error_count += 1;
                Err(DeliveryError::ChannelFull(client_id.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                entry.meta.error_count += 1;
                Err(DeliveryError::ChannelClosed(client_id.to_string()))
            }
        }
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|entry| !entry.handle.is_closed())
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientMetadata> {
        self.clients.get(client_id).map(|entry| &entry.meta)
    }

    /// Metadata snapshots sorted by id.
    pub fn list(&self) -> Vec<ClientMetadata> {
        let mut all: Vec<ClientMetadata> = self.clients.values().map(|entry| entry.meta.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Broadcast targets: every registered client except `sender`.
    pub fn recipients_except(&self, sender: &str, into: &mut Vec<String>) {
        into.extend(self.clients.keys().filter(|id| id.as_str() != sender).cloned());
    }

    /// Heartbeat classification of every client.
    pub fn liveness(&self, now: Instant, interval: std::time::Duration) -> Vec<(String, Liveness)> {
        self.clients
            .iter()
            .map(|(id, entry)| {
                let silent = now.saturating_duration_since(entry.heard);
                let liveness = if silent >= interval * 2 {
                    Liveness::Expired
                } else if silent >= interval {
                    Liveness::Silent
                } else {
                    Liveness::Fresh
                };
                (id.clone(), liveness)
            })
            .collect()
    }

    /// Clients whose connection is closed and who have been silent at least `stale_after`.
    pub fn stale(&self, now: Instant, stale_after: std::time::Duration) -> Vec<String> {
        self.clients
            .iter()
            .filter(|(_, entry)| {
                entry.handle.is_closed() && now.saturating_duration_since(entry.heard) >= stale_after
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Recompute the informational active/idle state from inbound recency.
    pub fn refresh_states(&mut self, now: Instant, idle_after: std::time::Duration) {
        for entry in self.clients.values_mut() {
            if !entry.meta.state.is_live() {
                continue;
            }
            entry.meta.state = if now.saturating_duration_since(entry.heard) >= idle_after {
                ConnectionState::Idle
            } else {
                ConnectionState::Active
            };
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(id: &str) -> RegistrationRequest {
        RegistrationRequest::new(id, "worker")
    }

    fn register(registry: &mut ConnectionRegistry, id: &str) -> (ConnectionHandle, mpsc::Receiver<ServerFrame>) {
        let (handle, rx) = ConnectionHandle::channel(4);
        registry
            .register(handle.clone(), &request(id), Instant::now(), Utc::now())
            .unwrap();
        (handle, rx)
    }

    #[test]
    fn capacity_ceiling_rejects_new_ids_only() {
        let mut registry = ConnectionRegistry::new(1);
        let _a = register(&mut registry, "a");

        let (handle, _rx) = ConnectionHandle::channel(4);
        let err = registry
            .register(handle, &request("b"), Instant::now(), Utc::now())
            .unwrap_err();
        assert_eq!(err, RegistrationError::CapacityExceeded { limit: 1 });

        // Re-binding an existing id is not a new connection.
        let (handle, _rx) = ConnectionHandle::channel(4);
        assert!(registry.register(handle, &request("a"), Instant::now(), Utc::now()).is_ok());
    }

    #[test]
    fn empty_id_is_malformed() {
        let mut registry = ConnectionRegistry::new(4);
        let (handle, _rx) = ConnectionHandle::channel(4);
        let err = registry
            .register(handle, &request("  "), Instant::now(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Malformed(_)));
    }

    #[test]
    fn last_writer_wins_and_stale_disconnect_is_ignored() {
        let mut registry = ConnectionRegistry::new(4);
        let (first, _rx1) = register(&mut registry, "a");

        let (second, _rx2) = ConnectionHandle::channel(4);
        let (_, replaced) = registry
            .register(second.clone(), &request("a"), Instant::now(), Utc::now())
            .unwrap();
        assert_eq!(replaced.map(|h| h.id), Some(first.id));

        assert!(registry.unregister("a", Some(first.id)).is_none());
        assert!(registry.contains("a"));

        let meta = registry.unregister("a", Some(second.id)).unwrap();
        assert_eq!(meta.state, ConnectionState::Disconnected);
        assert!(registry.is_empty());
    }

    #[test]
    fn delivery_to_closed_handle_counts_error() {
        let mut registry = ConnectionRegistry::new(4);
        let (_handle, rx) = register(&mut registry, "a");
        drop(rx);

        let err = registry.deliver("a", ServerFrame::Ping, Utc::now()).unwrap_err();
        assert_eq!(err, DeliveryError::ChannelClosed("a".to_string()));
        assert_eq!(registry.get("a").unwrap().error_count, 1);
        assert!(!registry.is_connected("a"));

        let err = registry.deliver("zz", ServerFrame::Ping, Utc::now()).unwrap_err();
        assert_eq!(err, DeliveryError::NotConnected("zz".to_string()));
    }

    #[test]
    fn full_outbound_channel_is_a_delivery_failure() {
        let mut registry = ConnectionRegistry::new(4);
        let (handle, _rx) = ConnectionHandle::channel(1);
        registry.register(handle, &request("a"), Instant::now(), Utc::now()).unwrap();

        registry.deliver("a", ServerFrame::Ping, Utc::now()).unwrap();
        let err = registry.deliver("a", ServerFrame::Ping, Utc::now()).unwrap_err();
        assert_eq!(err, DeliveryError::ChannelFull("a".to_string()));
        // Control frames carry no envelopes.
        assert_eq!(registry.get("a").unwrap().message_count, 0);
    }

    #[test]
    fn recipients_exclude_sender() {
        let mut registry = ConnectionRegistry::new(4);
        let _a = register(&mut registry, "a");
        let _b = register(&mut registry, "b");
        let _c = register(&mut registry, "c");

        let mut targets = Vec::new();
        registry.recipients_except("b", &mut targets);
        targets.sort();
        assert_eq!(targets, vec!["a", "c"]);
    }

    #[test]
    fn liveness_and_idle_states() {
        let mut registry = ConnectionRegistry::new(4);
        let start = Instant::now();
        let (handle, _rx) = ConnectionHandle::channel(4);
        registry.register(handle, &request("a"), start, Utc::now()).unwrap();
        let interval = Duration::from_secs(30);

        assert_eq!(registry.liveness(start + Duration::from_secs(10), interval)[0].1, Liveness::Fresh);
        assert_eq!(registry.liveness(start + Duration::from_secs(31), interval)[0].1, Liveness::Silent);
        assert_eq!(registry.liveness(start + Duration::from_secs(61), interval)[0].1, Liveness::Expired);

        registry.refresh_states(start + Duration::from_secs(90), Duration::from_secs(60));
        assert_eq!(registry.get("a").unwrap().state, ConnectionState::Idle);

        registry.record_inbound("a", start + Duration::from_secs(91), Utc::now());
        let meta = registry.get("a").unwrap();
        assert_eq!(meta.state, ConnectionState::Active);
        assert_eq!(meta.message_count, 1);
    }

    #[test]
    fn stale_requires_closed_handle() {
        let mut registry = ConnectionRegistry::new(4);
        let start = Instant::now();
        let (open, _rx_open) = ConnectionHandle::channel(4);
        let (closed, rx_closed) = ConnectionHandle::channel(4);
        registry.register(open, &request("open"), start, Utc::now()).unwrap();
        registry.register(closed, &request("closed"), start, Utc::now()).unwrap();
        drop(rx_closed);

        let stale = registry.stale(start + Duration::from_secs(400), Duration::from_secs(300));
        assert_eq!(stale, vec!["closed".to_string()]);
    }
}
