//! The control-plane loop and its handle.
//!
//! [`Hub`] is a single tokio task that owns the [`Router`]. Everything that
//! touches control-plane state arrives as a [`HubCommand`] or a timer tick and
//! is processed to completion before the next one, so the router needs no
//! locks. [`HubHandle`] is the cloneable message-passing front used by the
//! transport and HTTP layers.
//!
//! Offloaded transforms run on the [`WorkerPool`]; their results come back on
//! a dedicated channel and re-enter the loop like any other event.

use std::sync::Arc;

use agentbridge_types::client::{ClientMetadata, RegistrationRequest};
use agentbridge_types::config::{BridgeConfig, HubConfig};
use agentbridge_types::envelope::Envelope;
use agentbridge_types::error::{HubError, OffloadError, RegistrationError};
use agentbridge_types::event::UnregisterReason;
use agentbridge_types::metrics::HubMetrics;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::history::HistoryFilter;
use crate::memory::MemorySampler;
use crate::offload::WorkerPool;
use crate::registry::ConnectionHandle;
use crate::router::{OffloadRequest, Router};

type OffloadResult = (u64, Result<Value, OffloadError>);

/// Requests processed by the control-plane loop.
#[derive(Debug)]
pub enum HubCommand {
    Register {
        handle: ConnectionHandle,
        request: RegistrationRequest,
        reply: oneshot::Sender<Result<ClientMetadata, RegistrationError>>,
    },
    Disconnect {
        client_id: String,
        /// Only unregister if the id is still bound to this connection.
        connection: Option<Uuid>,
        permanent: bool,
        reply: Option<oneshot::Sender<bool>>,
    },
    Submit {
        raw: Value,
        sender: Option<String>,
        allow_queue: bool,
        reply: oneshot::Sender<Result<Arc<Envelope>, HubError>>,
    },
    Heartbeat {
        client_id: String,
    },
    Clients {
        reply: oneshot::Sender<Vec<ClientMetadata>>,
    },
    History {
        filter: HistoryFilter,
        reply: oneshot::Sender<Vec<Arc<Envelope>>>,
    },
    Metrics {
        reply: oneshot::Sender<HubMetrics>,
    },
}

/// The control-plane task.
pub struct Hub {
    router: Router,
    workers: WorkerPool,
    config: HubConfig,
    maintenance_period: std::time::Duration,
    commands: mpsc::Receiver<HubCommand>,
    results_tx: mpsc::UnboundedSender<OffloadResult>,
    results: mpsc::UnboundedReceiver<OffloadResult>,
}

impl Hub {
    /// Build the router and worker pool and start the loop.
    ///
    /// The loop stops when `cancel` fires or every handle is dropped; the
    /// worker pool is drained before the returned task completes.
    pub fn spawn(
        config: &BridgeConfig,
        sampler: Box<dyn MemorySampler>,
        events: EventBus,
        cancel: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::channel(config.hub.command_buffer.max(1));
        let (results_tx, results) = mpsc::unbounded_channel();

        let hub = Hub {
            router: Router::new(config, sampler, events.clone()),
            workers: WorkerPool::start(config.workers.clone()),
            config: config.hub.clone(),
            maintenance_period: config.pool.maintenance_interval(),
            commands,
            results_tx,
            results,
        };
        let task = tokio::spawn(hub.run(cancel.clone()));

        let handle = HubHandle {
            commands: commands_tx,
            events,
            cancel,
        };
        (handle, task)
    }

    async fn run(mut self, cancel: CancellationToken) {
        let mut heartbeat = ticker(self.config.heartbeat_interval());
        let mut cleanup = ticker(self.config.cleanup_interval());
        let mut maintenance = ticker(self.maintenance_period);
        tracing::info!(
            heartbeat_secs = self.config.heartbeat_interval_secs,
            cleanup_secs = self.config.cleanup_interval_secs,
            "hub started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },

                Some((seq, result)) = self.results.recv() => {
                    self.router.complete_offload(seq, result);
                }

                _ = heartbeat.tick() => {
                    let report = self.router.heartbeat_cycle(Instant::now());
                    if report != Default::default() {
                        tracing::debug!(?report, "heartbeat cycle");
                    }
                }

                _ = cleanup.tick() => {
                    let report = self.router.cleanup_cycle(Instant::now());
                    if report != Default::default() {
                        tracing::debug!(?report, "cleanup cycle");
                    }
                }

                _ = maintenance.tick() => {
                    self.router.maintenance_cycle(Instant::now());
                }
            }
        }

        tracing::info!(staged = self.router.staged_len(), "hub stopping, draining offload pool");
        self.workers.shutdown().await;
        tracing::info!("hub stopped");
    }

    fn handle(&mut self, cmd: HubCommand) {
        let now = Instant::now();
        match cmd {
            HubCommand::Register { handle, request, reply } => {
                let _ = reply.send(self.router.register(handle, request, now));
            }
            HubCommand::Disconnect {
                client_id,
                connection,
                permanent,
                reply,
            } => {
                let removed = self
                    .router
                    .disconnect(&client_id, connection, permanent, UnregisterReason::Disconnected, now);
                if let Some(reply) = reply {
                    let _ = reply.send(removed);
                }
            }
            HubCommand::Submit {
                raw,
                sender,
                allow_queue,
                reply,
            } => {
                let result = self
                    .router
                    .accept_envelope(raw, sender.as_deref(), allow_queue, now)
                    .map(|outcome| {
                        if let Some(request) = outcome.offload {
                            self.offload(request);
                        }
                        outcome.envelope
                    });
                let _ = reply.send(result);
            }
            HubCommand::Heartbeat { client_id } => {
                self.router.touch(&client_id, now);
            }
            HubCommand::Clients { reply } => {
                let _ = reply.send(self.router.list_clients());
            }
            HubCommand::History { filter, reply } => {
                let _ = reply.send(self.router.history(&filter));
            }
            HubCommand::Metrics { reply } => {
                let _ = reply.send(self.router.metrics(self.workers.statistics()));
            }
        }
    }

    fn offload(&mut self, request: OffloadRequest) {
        let OffloadRequest {
            seq, task, options, ..
        } = request;
        match self.workers.submit(task, options) {
            Ok(pending) => {
                let results = self.results_tx.clone();
                tokio::spawn(async move {
                    let result = pending.wait().await;
                    let _ = results.send((seq, result));
                });
            }
            Err(error) => self.router.complete_offload(seq, Err(error)),
        }
    }
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Cloneable front door to the hub loop.
///
/// Every call fails with [`HubError::Unavailable`] once the loop has stopped.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    events: EventBus,
    cancel: CancellationToken,
}

impl HubHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(make(reply)).await.map_err(|_| HubError::Unavailable)?;
        rx.await.map_err(|_| HubError::Unavailable)
    }

    pub async fn register(
        &self,
        handle: ConnectionHandle,
        request: RegistrationRequest,
    ) -> Result<ClientMetadata, HubError> {
        let result = self
            .request(|reply| HubCommand::Register { handle, request, reply })
            .await?;
        Ok(result?)
    }

    /// Unregister a client. Returns whether it was registered.
    pub async fn disconnect(&self, client_id: &str, connection: Option<Uuid>, permanent: bool) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::Disconnect {
            client_id: client_id.to_string(),
            connection,
            permanent,
            reply: Some(reply),
        })
        .await
    }

    /// Accept an envelope. `sender` is the registered id of the submitting
    /// connection, if any.
    pub async fn submit(&self, raw: Value, sender: Option<String>, allow_queue: bool) -> Result<Arc<Envelope>, HubError> {
        self.request(|reply| HubCommand::Submit {
            raw,
            sender,
            allow_queue,
            reply,
        })
        .await?
    }

    /// Record a heartbeat. Does not wait for the loop.
    pub async fn heartbeat(&self, client_id: &str) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::Heartbeat {
                client_id: client_id.to_string(),
            })
            .await
            .map_err(|_| HubError::Unavailable)
    }

    pub async fn clients(&self) -> Result<Vec<ClientMetadata>, HubError> {
        self.request(|reply| HubCommand::Clients { reply }).await
    }

    pub async fn history(&self, filter: HistoryFilter) -> Result<Vec<Arc<Envelope>>, HubError> {
        self.request(|reply| HubCommand::History { filter, reply }).await
    }

    pub async fn metrics(&self) -> Result<HubMetrics, HubError> {
        self.request(|reply| HubCommand::Metrics { reply }).await
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Ask the loop to stop. Await the task returned by [`Hub::spawn`] to
    /// wait for the offload pool to drain.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
