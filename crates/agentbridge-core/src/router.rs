//! Envelope router: the control plane.
//!
//! The router owns the registry, history, offline queue, memory monitor and
//! the scratch pools. All of its methods are synchronous and run on the single
//! hub task, so none of that state is shared or locked. The only work that
//! leaves the control plane is a payload transform, returned to the caller as
//! an [`OffloadRequest`] and fed back through [`Router::complete_offload`].
//!
//! Routing:
//! - `to` set: direct delivery. A recipient that already has queued entries,
//!   or whose send fails, gets the envelope appended to its offline queue
//!   (when queueing is allowed), so per-recipient order always matches
//!   accept order.
//! - `to` absent: best-effort broadcast to every registered client except the
//!   sender. Broadcasts are never queued.
//! - Heavy envelopes are held until their transform returns. A later envelope
//!   waits behind them only if it shares a recipient: direct sends to other
//!   clients go straight out, while a broadcast waits behind every held
//!   envelope and holds back everything after it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use agentbridge_types::client::{ClientMetadata, RegistrationRequest};
use agentbridge_types::config::{BridgeConfig, HubConfig};
use agentbridge_types::envelope::Envelope;
use agentbridge_types::error::{DeliveryError, HubError, OffloadError, RegistrationError};
use agentbridge_types::event::{HubEvent, UnregisterReason};
use agentbridge_types::metrics::{HubMetrics, PressureLevel, WorkerPoolStatistics};
use agentbridge_types::wire::ServerFrame;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::time::Instant;
use uuid::Uuid;

use crate::envelope::{EnrichContext, TrackedEnvelope, enrich, payload_size};
use crate::event::EventBus;
use crate::history::{HistoryBuffer, HistoryFilter};
use crate::memory::{CollectionDecision, MemoryMonitor, MemorySampler, PressureReading};
use crate::offload::{ExecuteOptions, OffloadTask, TransformKind};
use crate::pool::ObjectPool;
use crate::queue::OfflineQueue;
use crate::registry::{ConnectionHandle, ConnectionRegistry, Liveness};

/// Trace key recording the outcome of an offloaded transform.
pub const OFFLOAD_TRACE_KEY: &str = "offload";

/// A transform the caller must run on the offload pool.
#[derive(Debug)]
pub struct OffloadRequest {
    /// Hand back to [`Router::complete_offload`] with the result.
    pub seq: u64,
    pub kind: TransformKind,
    pub task: OffloadTask,
    pub options: ExecuteOptions,
}

/// Result of accepting an envelope.
#[derive(Debug)]
pub struct AcceptOutcome {
    /// The enriched envelope as recorded in history.
    pub envelope: Arc<Envelope>,
    pub offload: Option<OffloadRequest>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub expired: usize,
    pub flushed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub evicted: usize,
    /// Offline queues cleared because their owner stayed away too long.
    pub expired_queues: usize,
    pub memory_checked: bool,
}

#[derive(Debug)]
enum Slot {
    Pending { original: TrackedEnvelope, kind: TransformKind },
    Ready(TrackedEnvelope),
}

#[derive(Debug)]
struct Staged {
    seq: u64,
    allow_queue: bool,
    slot: Slot,
}

impl Staged {
    fn to(&self) -> Option<&str> {
        let tracked = match &self.slot {
            Slot::Pending { original, .. } => original,
            Slot::Ready(tracked) => tracked,
        };
        tracked.envelope.to.as_deref()
    }
}

#[derive(Debug, Default)]
struct Counters {
    accepted: u64,
    delivered: u64,
    queued: u64,
    dropped: u64,
    offloaded: u64,
    errors: u64,
    connections_total: u64,
}

pub struct Router {
    config: HubConfig,
    registry: ConnectionRegistry,
    history: HistoryBuffer<TrackedEnvelope>,
    queue: OfflineQueue,
    monitor: MemoryMonitor,
    /// Serialization buffers for payload measurement.
    scratch: ObjectPool<Vec<u8>>,
    /// Broadcast fan-out target lists.
    recipients: ObjectPool<Vec<String>>,
    events: EventBus,
    transform_intents: HashSet<String>,
    staged: VecDeque<Staged>,
    next_seq: u64,
    /// Clients that left without a permanent unregister, and when.
    departed: HashMap<String, Instant>,
    counters: Counters,
    started: Instant,
}

impl Router {
    pub fn new(config: &BridgeConfig, sampler: Box<dyn MemorySampler>, events: EventBus) -> Self {
        let hub = config.hub.clone();
        Self {
            registry: ConnectionRegistry::new(hub.max_connections),
            history: HistoryBuffer::new(hub.history_capacity),
            queue: OfflineQueue::new(hub.offline_queue_limit, config.pool.clone()),
            monitor: MemoryMonitor::new(config.memory.clone(), sampler),
            scratch: ObjectPool::new("scratch", config.pool.clone(), || Vec::with_capacity(4096)),
            recipients: ObjectPool::new("recipients", config.pool.clone(), Vec::new),
            events,
            transform_intents: hub.transform_intents.iter().cloned().collect(),
            staged: VecDeque::new(),
            next_seq: 0,
            departed: HashMap::new(),
            counters: Counters::default(),
            started: Instant::now(),
            config: hub,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a connection, reply with recent history, then flush any
    /// offline queue held for the client.
    pub fn register(
        &mut self,
        handle: ConnectionHandle,
        request: RegistrationRequest,
        now: Instant,
    ) -> Result<ClientMetadata, RegistrationError> {
        let (meta, replaced) = match self.registry.register(handle, &request, now, Utc::now()) {
            Ok(registered) => registered,
            Err(error) => {
                self.counters.errors += 1;
                tracing::warn!(client_id = %request.client_id, %error, "registration rejected");
                return Err(error);
            }
        };

        if let Some(old) = replaced {
            tracing::info!(client_id = %meta.id, connection = %old.id, "replacing previous connection");
            self.events.publish(HubEvent::ClientUnregistered {
                client_id: meta.id.clone(),
                reason: UnregisterReason::Replaced,
            });
        }
        self.departed.remove(&meta.id);
        self.counters.connections_total += 1;

        let history = self
            .history
            .to_vec(Some(self.config.history_replay))
            .into_iter()
            .map(|t| t.envelope)
            .collect();
        let registered = ServerFrame::Registered {
            client: meta.clone(),
            history,
        };
        if let Err(error) = self.registry.deliver(&meta.id, registered, Utc::now()) {
            self.delivery_failed(&meta.id, &error);
        }

        let flushed = self.flush(&meta.id);
        tracing::info!(client_id = %meta.id, role = %meta.role, flushed, "client registered");
        self.events.publish(HubEvent::ClientRegistered {
            client_id: meta.id.clone(),
            flushed,
        });
        Ok(meta)
    }

    /// Remove a client.
    ///
    /// With `connection`, only if the id is still bound to that connection.
    /// A permanent unregister also clears the client's offline queue; otherwise
    /// the queue is kept until the client returns or the cleanup cycle expires it.
    pub fn disconnect(
        &mut self,
        client_id: &str,
        connection: Option<Uuid>,
        permanent: bool,
        reason: UnregisterReason,
        now: Instant,
    ) -> bool {
        let removed = self.registry.unregister(client_id, connection);
        if removed.is_none() && connection.is_some() {
            tracing::debug!(client_id, "ignoring disconnect of a superseded connection");
            return false;
        }

        if permanent {
            self.departed.remove(client_id);
            let cleared = self.queue.clear(client_id);
            if cleared > 0 {
                self.counters.dropped += cleared as u64;
                tracing::info!(client_id, cleared, "offline queue cleared");
            }
        } else if removed.is_some() {
            self.departed.insert(client_id.to_string(), now);
        }

        match removed {
            Some(meta) => {
                tracing::info!(client_id, ?reason, messages = meta.message_count, "client unregistered");
                self.events.publish(HubEvent::ClientUnregistered {
                    client_id: client_id.to_string(),
                    reason,
                });
                true
            }
            None => false,
        }
    }

    /// Inbound liveness signal from a client.
    pub fn touch(&mut self, client_id: &str, now: Instant) -> bool {
        self.registry.touch(client_id, now, Utc::now())
    }

    // -----------------------------------------------------------------------
    // Accept and route
    // -----------------------------------------------------------------------

    /// Enrich, record and route one envelope.
    ///
    /// `sender` is the registered id of the submitting connection. With
    /// `allow_queue` false, a direct send is rejected with
    /// [`HubError::RecipientUnreachable`] and not recorded when the recipient
    /// is not connected or still has queued envelopes that cannot be flushed.
    pub fn accept_envelope(
        &mut self,
        raw: Value,
        sender: Option<&str>,
        allow_queue: bool,
        now: Instant,
    ) -> Result<AcceptOutcome, HubError> {
        if let Some(sender) = sender {
            self.registry.record_inbound(sender, now, Utc::now());
        }

        let registry = &self.registry;
        let role_of = |id: &str| registry.get(id).map(|meta| meta.role.clone());
        let ctx = EnrichContext {
            sender,
            role_of: &role_of,
            max_payload_bytes: self.config.max_payload_bytes,
            now: Utc::now(),
        };
        let mut scratch = self.scratch.acquire();
        let enriched = enrich(raw, &ctx, &mut scratch);
        self.scratch.release(scratch);

        let tracked = match enriched {
            Ok(tracked) => tracked,
            Err(error) => {
                self.counters.errors += 1;
                self.counters.dropped += 1;
                tracing::warn!(sender = sender.unwrap_or("-"), %error, "envelope rejected");
                self.events.publish(HubEvent::EnvelopeDropped {
                    envelope_id: None,
                    reason: error.to_string(),
                });
                return Err(error.into());
            }
        };

        if !allow_queue {
            if let Some(to) = tracked.envelope.to.as_deref() {
                if let Err(error) = self.reachable(to) {
                    self.counters.errors += 1;
                    self.counters.dropped += 1;
                    tracing::debug!(envelope_id = %tracked.envelope.id, %error, "required recipient unreachable");
                    self.events.publish(HubEvent::EnvelopeDropped {
                        envelope_id: Some(tracked.envelope.id.clone()),
                        reason: error.to_string(),
                    });
                    return Err(HubError::RecipientUnreachable(error));
                }
            }
        }

        self.counters.accepted += 1;
        self.history.push(tracked.clone());
        let envelope = Arc::clone(&tracked.envelope);

        let offload = if self.is_heavy(&tracked) {
            let kind = TransformKind::for_intent(&envelope.intent);
            let seq = self.next_seq;
            self.next_seq += 1;
            tracing::debug!(envelope_id = %envelope.id, seq, transform = %kind, bytes = tracked.payload_bytes, "offloading heavy envelope");
            let task = kind.task(Arc::clone(&envelope));
            self.staged.push_back(Staged {
                seq,
                allow_queue,
                slot: Slot::Pending { original: tracked, kind },
            });
            Some(OffloadRequest {
                seq,
                kind,
                task,
                options: ExecuteOptions {
                    priority: envelope.priority,
                    timeout: None,
                },
            })
        } else if !self.staged.is_empty() {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.staged.push_back(Staged {
                seq,
                allow_queue,
                slot: Slot::Ready(tracked),
            });
            self.release_staged();
            None
        } else {
            self.route(tracked, allow_queue);
            None
        };

        Ok(AcceptOutcome { envelope, offload })
    }

    /// Whether a direct send to `to` can go out now, flushing its offline
    /// queue first when needed.
    fn reachable(&mut self, to: &str) -> Result<(), DeliveryError> {
        if !self.registry.is_connected(to) {
            return Err(DeliveryError::NotConnected(to.to_string()));
        }
        if self.queue.has_pending(to) {
            self.flush(to);
            if self.queue.has_pending(to) {
                return Err(DeliveryError::ChannelFull(to.to_string()));
            }
        }
        Ok(())
    }

    fn is_heavy(&self, tracked: &TrackedEnvelope) -> bool {
        tracked.payload_bytes > self.config.heavy_payload_bytes
            || self.transform_intents.contains(&tracked.envelope.intent)
    }

    /// Feed back the result of an offloaded transform and release every
    /// staged envelope that is now at the head of the line.
    ///
    /// A failed transform degrades: the untransformed payload is delivered
    /// with the failure recorded under `trace.offload.error`.
    pub fn complete_offload(&mut self, seq: u64, result: Result<Value, OffloadError>) {
        let Some(staged) = self.staged.iter_mut().find(|s| s.seq == seq) else {
            tracing::debug!(seq, "offload result for unknown sequence");
            return;
        };
        let Slot::Pending { original, kind } = &staged.slot else {
            return;
        };
        let kind = *kind;

        let ready = match result {
            Ok(payload) => {
                let mut scratch = self.scratch.acquire();
                let measured = payload_size(&payload, &mut scratch);
                self.scratch.release(scratch);
                match measured {
                    Ok(bytes_after) => {
                        self.counters.offloaded += 1;
                        let trace = json!({
                            "transform": kind.as_str(),
                            "bytesBefore": original.payload_bytes,
                            "bytesAfter": bytes_after,
                        });
                        let envelope = original
                            .envelope
                            .with_transformed_payload(payload, OFFLOAD_TRACE_KEY, trace);
                        TrackedEnvelope::new(envelope, bytes_after)
                    }
                    Err(error) => degraded(original, kind, &error.to_string(), &self.events),
                }
            }
            Err(error) => degraded(original, kind, &error.to_string(), &self.events),
        };
        staged.slot = Slot::Ready(ready);
        self.release_staged();
    }

    /// Route every ready envelope that shares no recipient with an earlier
    /// held one.
    fn release_staged(&mut self) {
        let mut held = VecDeque::with_capacity(self.staged.len());
        let mut ready = Vec::new();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut all_blocked = false;

        while let Some(staged) = self.staged.pop_front() {
            let to = staged.to().map(str::to_string);
            let waits = all_blocked
                || matches!(staged.slot, Slot::Pending { .. })
                || match &to {
                    Some(to) => blocked.contains(to),
                    None => !held.is_empty(),
                };
            if !waits {
                ready.push(staged);
                continue;
            }
            match to {
                Some(to) => {
                    blocked.insert(to);
                }
                None => all_blocked = true,
            }
            held.push_back(staged);
        }
        self.staged = held;

        for staged in ready {
            if let Slot::Ready(tracked) = staged.slot {
                self.route(tracked, staged.allow_queue);
            }
        }
    }

    /// Envelopes held behind an in-flight offload, the offloaded ones included.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn route(&mut self, tracked: TrackedEnvelope, allow_queue: bool) {
        match tracked.envelope.to.clone() {
            Some(to) => self.route_direct(&to, tracked, allow_queue),
            None => self.broadcast(tracked),
        }
    }

    fn route_direct(&mut self, to: &str, tracked: TrackedEnvelope, allow_queue: bool) {
        let id = tracked.envelope.id.clone();

        // Anything already parked for this recipient must go out first.
        if self.queue.has_pending(to) {
            if allow_queue {
                self.park(to, tracked);
                if self.registry.is_connected(to) {
                    self.flush(to);
                }
                return;
            }
            if let Err(error) = self.reachable(to) {
                self.drop_undeliverable(to, &id, &error);
                return;
            }
        }

        let frame = ServerFrame::Envelope {
            envelope: Arc::clone(&tracked.envelope),
        };
        match self.registry.deliver(to, frame, Utc::now()) {
            Ok(()) => {
                self.counters.delivered += 1;
                tracing::debug!(envelope_id = %id, to, "delivered");
            }
            Err(error) => {
                if !matches!(error, DeliveryError::NotConnected(_)) {
                    self.delivery_failed(to, &error);
                }
                if allow_queue {
                    self.park(to, tracked);
                } else {
                    self.drop_undeliverable(to, &id, &error);
                }
            }
        }
    }

    fn broadcast(&mut self, tracked: TrackedEnvelope) {
        let mut targets = self.recipients.acquire();
        self.registry.recipients_except(&tracked.envelope.from, &mut targets);

        let mut delivered = 0;
        for target in targets.iter() {
            let frame = ServerFrame::Envelope {
                envelope: Arc::clone(&tracked.envelope),
            };
            match self.registry.deliver(target, frame, Utc::now()) {
                Ok(()) => delivered += 1,
                Err(error) => self.delivery_failed(target, &error),
            }
        }
        self.counters.delivered += delivered;
        tracing::debug!(
            envelope_id = %tracked.envelope.id,
            from = %tracked.envelope.from,
            recipients = targets.len(),
            delivered,
            "broadcast"
        );
        self.recipients.release(targets);
    }

    fn park(&mut self, to: &str, tracked: TrackedEnvelope) {
        tracing::debug!(envelope_id = %tracked.envelope.id, to, "queued for offline recipient");
        self.counters.queued += 1;
        if let Some(dropped) = self.queue.enqueue(to, tracked) {
            self.counters.dropped += 1;
            tracing::warn!(to, envelope_id = %dropped.envelope.id, "offline queue full, dropped oldest entry");
            self.events.publish(HubEvent::EnvelopeDropped {
                envelope_id: Some(dropped.envelope.id.clone()),
                reason: format!("offline queue limit reached for '{to}'"),
            });
        }
    }

    fn drop_undeliverable(&mut self, to: &str, envelope_id: &str, error: &DeliveryError) {
        self.counters.errors += 1;
        self.counters.dropped += 1;
        tracing::warn!(envelope_id, to, %error, "envelope dropped, queueing disabled");
        self.events.publish(HubEvent::EnvelopeDropped {
            envelope_id: Some(envelope_id.to_string()),
            reason: error.to_string(),
        });
    }

    fn delivery_failed(&mut self, client_id: &str, error: &DeliveryError) {
        self.counters.errors += 1;
        tracing::warn!(client_id, %error, "delivery failed");
        self.events.publish(HubEvent::DeliveryFailed {
            client_id: client_id.to_string(),
            error: error.to_string(),
        });
    }

    /// Send a client's offline queue as batch frames. Returns envelopes sent.
    ///
    /// A batch that cannot be sent goes back to the head of the queue.
    fn flush(&mut self, client_id: &str) -> usize {
        let mut sent = 0;
        loop {
            let batch = self.queue.dequeue(client_id, self.config.offline_batch_size);
            if batch.is_empty() {
                break;
            }
            let envelopes: Vec<Arc<Envelope>> = batch.iter().map(|t| Arc::clone(&t.envelope)).collect();
            let count = envelopes.len();
            match self.registry.deliver(client_id, ServerFrame::Batch { envelopes }, Utc::now()) {
                Ok(()) => {
                    sent += count;
                    self.counters.delivered += count as u64;
                }
                Err(error) => {
                    self.queue.requeue_front(client_id, batch);
                    if !matches!(error, DeliveryError::NotConnected(_)) {
                        self.delivery_failed(client_id, &error);
                    }
                    break;
                }
            }
        }
        if sent > 0 {
            tracing::debug!(client_id, sent, "offline queue flushed");
        }
        sent
    }

    // -----------------------------------------------------------------------
    // Periodic cycles
    // -----------------------------------------------------------------------

    /// Ping clients silent for one interval, force-unregister those silent for
    /// two, and retry pending offline queues of connected clients.
    pub fn heartbeat_cycle(&mut self, now: Instant) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();
        for (client_id, liveness) in self.registry.liveness(now, self.config.heartbeat_interval()) {
            match liveness {
                Liveness::Fresh => {}
                Liveness::Silent => match self.registry.deliver(&client_id, ServerFrame::Ping, Utc::now()) {
                    Ok(()) => report.pinged += 1,
                    Err(error) => self.delivery_failed(&client_id, &error),
                },
                Liveness::Expired => {
                    tracing::warn!(client_id = %client_id, "heartbeat timeout");
                    if self.disconnect(&client_id, None, false, UnregisterReason::HeartbeatTimeout, now) {
                        report.expired += 1;
                    }
                }
            }
        }

        for client_id in self.queue.recipients() {
            if self.registry.is_connected(&client_id) {
                report.flushed += self.flush(&client_id);
            }
        }
        report
    }

    /// Evict stale closed connections, expire abandoned offline queues, refresh
    /// active/idle states, and check memory when the hub heap is past warning.
    pub fn cleanup_cycle(&mut self, now: Instant) -> CleanupReport {
        let mut report = CleanupReport::default();
        let stale_after = self.config.stale_after();

        for client_id in self.registry.stale(now, stale_after) {
            if self.disconnect(&client_id, None, true, UnregisterReason::Stale, now) {
                report.evicted += 1;
            }
        }

        let expired: Vec<String> = self
            .departed
            .iter()
            .filter(|(_, left)| now.saturating_duration_since(**left) >= stale_after)
            .map(|(id, _)| id.clone())
            .collect();
        for client_id in expired {
            self.departed.remove(&client_id);
            let cleared = self.queue.clear(&client_id);
            self.counters.dropped += cleared as u64;
            if cleared > 0 {
                report.expired_queues += 1;
                tracing::info!(client_id = %client_id, cleared, "offline queue expired");
            }
        }

        self.registry.refresh_states(now, self.config.idle_after());

        let heap_ratio = self.monitor.heap_ratio(self.heap_used());
        if heap_ratio >= self.monitor.config().warning_ratio {
            self.check_memory(now);
            report.memory_checked = true;
        }
        report
    }

    /// Pool maintenance plus a memory check.
    pub fn maintenance_cycle(&mut self, now: Instant) -> PressureReading {
        let evicted = self.scratch.maintain(now) + self.recipients.maintain(now) + self.queue.maintain(now);
        if evicted > 0 {
            tracing::debug!(evicted, "pool maintenance");
        }
        self.check_memory(now)
    }

    /// Hub-held envelope bytes: history plus offline queues.
    pub fn heap_used(&self) -> u64 {
        (self.history.bytes() + self.queue.bytes()) as u64
    }

    /// Classify pressure and react: collect at high or critical pressure,
    /// alert on critical pressure and on a leak trend.
    pub fn check_memory(&mut self, now: Instant) -> PressureReading {
        let heap_used = self.heap_used();
        let reading = self.monitor.check_pressure(heap_used, now);

        if let Some(from) = reading.previous {
            if reading.level > from && reading.level >= PressureLevel::High {
                tracing::warn!(%from, to = %reading.level, heap = reading.heap_ratio, resident = reading.resident_ratio, "memory pressure rising");
            } else {
                tracing::info!(%from, to = %reading.level, "memory pressure changed");
            }
            self.events.publish(HubEvent::PressureChanged {
                from,
                to: reading.level,
            });
        }

        if reading.level == PressureLevel::Critical {
            tracing::warn!(heap = reading.heap_ratio, resident = reading.resident_ratio, "memory critical");
            self.events.publish(HubEvent::MemoryCritical {
                heap_ratio: reading.heap_ratio,
                resident_ratio: reading.resident_ratio,
            });
        }

        if reading.level >= PressureLevel::High {
            let reason = format!("pressure {}", reading.level);
            match self.monitor.request_collection(&reason, now) {
                CollectionDecision::Granted => {
                    let reclaimed = self.reclaim();
                    self.events.publish(HubEvent::CollectionPerformed {
                        reason,
                        reclaimed_objects: reclaimed,
                    });
                }
                decision => tracing::debug!(?decision, "collection not performed"),
            }
        }

        if let Some(rate) = self.monitor.detect_leak_trend() {
            self.events.publish(HubEvent::LeakSuspected {
                rate_bytes_per_min: rate,
            });
        }
        reading
    }

    /// Drain every pool to its floor and trim queue containers.
    fn reclaim(&mut self) -> usize {
        let reclaimed = self.scratch.drain_to_floor() + self.recipients.drain_to_floor() + self.queue.shrink();
        tracing::info!(reclaimed, "memory reclaimed");
        reclaimed
    }

    // -----------------------------------------------------------------------
    // Collaborator queries
    // -----------------------------------------------------------------------

    pub fn list_clients(&self) -> Vec<ClientMetadata> {
        self.registry.list()
    }

    pub fn history(&self, filter: &HistoryFilter) -> Vec<Arc<Envelope>> {
        let entries = if filter.is_empty() {
            self.history.to_vec(filter.limit)
        } else {
            self.history.filter(|t| filter.matches(&t.envelope), filter.limit)
        };
        entries.into_iter().map(|t| t.envelope).collect()
    }

    pub fn metrics(&self, workers: WorkerPoolStatistics) -> HubMetrics {
        let mut pools = std::collections::BTreeMap::new();
        pools.insert(self.scratch.name().to_string(), self.scratch.statistics());
        pools.insert(self.recipients.name().to_string(), self.recipients.statistics());
        pools.insert("offline_queue".to_string(), self.queue.pool_statistics());

        HubMetrics {
            messages_accepted: self.counters.accepted,
            messages_delivered: self.counters.delivered,
            messages_queued: self.counters.queued,
            messages_dropped: self.counters.dropped,
            messages_offloaded: self.counters.offloaded,
            errors: self.counters.errors,
            connections_total: self.counters.connections_total,
            connections_active: self.registry.len(),
            offline_queue_depth: self.queue.total_depth(),
            offline_recipients: self.queue.recipient_count(),
            history_len: self.history.len(),
            history_capacity: self.history.capacity(),
            staged: self.staged.len(),
            pools,
            workers,
            memory: self.monitor.snapshot(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("clients", &self.registry.len())
            .field("history", &self.history.len())
            .field("queued", &self.queue.total_depth())
            .field("staged", &self.staged.len())
            .finish()
    }
}

/// The untransformed envelope, marked with the transform failure.
fn degraded(original: &TrackedEnvelope, kind: TransformKind, error: &str, events: &EventBus) -> TrackedEnvelope {
    tracing::warn!(envelope_id = %original.envelope.id, transform = %kind, error, "offload failed, delivering untransformed payload");
    events.publish(HubEvent::OffloadDegraded {
        envelope_id: original.envelope.id.clone(),
        error: error.to_string(),
    });
    let trace = json!({"transform": kind.as_str(), "error": error});
    let envelope = original.envelope.with_transformed_payload(
        original.envelope.payload.clone(),
        OFFLOAD_TRACE_KEY,
        trace,
    );
    TrackedEnvelope::new(envelope, original.payload_bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
