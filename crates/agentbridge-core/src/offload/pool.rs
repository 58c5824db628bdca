//! Elastic pool of execution units.
//!
//! [`WorkerPool`] is a cloneable handle over a supervisor task that owns the
//! units and the priority queue. Tasks go in and results come out through
//! channels only; callers never share state with the units.
//!
//! - Queue order is priority first, then submission order.
//! - A unit is added when the queue is deeper than the unit count, up to
//!   `max_workers`. Idle units beyond `min_workers` are torn down by the
//!   maintenance tick.
//! - A task past its deadline fails with [`OffloadError::TaskTimeout`]; the
//!   unit running it is retired and replaced, so one stuck task never starves
//!   the pool. A panic fails only its own task.
//! - A retired unit's thread cannot be killed. One stuck in a job stays alive,
//!   detached, until the job returns; the count of such threads is reported
//!   as `detached` and a warning is logged once it passes `max_workers`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use agentbridge_types::config::WorkerConfig;
use agentbridge_types::envelope::Priority;
use agentbridge_types::error::OffloadError;
use agentbridge_types::metrics::WorkerPoolStatistics;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout_at};

use super::task::{ExecuteOptions, OffloadTask};
use super::unit::{Job, Unit, UnitOutcome};

type Reply = oneshot::Sender<Result<Value, OffloadError>>;

/// How a unit's job ended, as reported by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Completed,
    Failed,
    Crashed,
    TimedOut,
}

enum Command {
    Submit {
        task: OffloadTask,
        priority: Priority,
        deadline: Instant,
        timeout: Duration,
        reply: Reply,
    },
    Finished {
        unit_id: u64,
        status: JobStatus,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

struct Queued {
    priority: Priority,
    seq: u64,
    task: OffloadTask,
    deadline: Instant,
    timeout: Duration,
    reply: Reply,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A submitted task awaiting its result.
#[derive(Debug)]
pub struct PendingTask {
    rx: oneshot::Receiver<Result<Value, OffloadError>>,
    deadline: Instant,
    timeout: Duration,
}

impl PendingTask {
    /// Wait for the result, abandoning the task at its deadline.
    pub async fn wait(self) -> Result<Value, OffloadError> {
        match timeout_at(self.deadline, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OffloadError::ShuttingDown),
            Err(_) => Err(OffloadError::TaskTimeout(self.timeout)),
        }
    }
}

/// Handle to the offload pool.
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
    stats: watch::Receiver<WorkerPoolStatistics>,
    default_timeout: Duration,
}

impl WorkerPool {
    /// Start the pool with `min_workers` units. Must be called from inside a
    /// tokio runtime.
    pub fn start(config: WorkerConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (stats_tx, stats) = watch::channel(WorkerPoolStatistics::default());
        let default_timeout = config.default_timeout();

        let mut supervisor = Supervisor {
            config,
            units: HashMap::new(),
            queue: BinaryHeap::new(),
            next_unit: 0,
            next_seq: 0,
            commands: commands.downgrade(),
            stats: stats_tx,
            counters: Counters::default(),
            live_threads: Arc::new(AtomicUsize::new(0)),
        };
        supervisor.ensure_minimum();
        supervisor.publish();
        tokio::spawn(supervisor.run(rx));

        Self {
            commands,
            stats,
            default_timeout,
        }
    }

    /// Queue a task without waiting for it.
    pub fn submit(&self, task: OffloadTask, options: ExecuteOptions) -> Result<PendingTask, OffloadError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                task,
                priority: options.priority,
                deadline,
                timeout,
                reply,
            })
            .map_err(|_| OffloadError::ShuttingDown)?;
        Ok(PendingTask { rx, deadline, timeout })
    }

    /// Run a task and wait for its result.
    pub async fn execute(&self, task: OffloadTask, options: ExecuteOptions) -> Result<Value, OffloadError> {
        self.submit(task, options)?.wait().await
    }

    pub fn statistics(&self) -> WorkerPoolStatistics {
        self.stats.borrow().clone()
    }

    /// Drain in-flight tasks up to the grace period, then abandon the rest.
    ///
    /// Queued tasks fail with [`OffloadError::ShuttingDown`].
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("stats", &*self.stats.borrow()).finish()
    }
}

#[derive(Default)]
struct Counters {
    completed: u64,
    failed: u64,
    timed_out: u64,
    crashed: u64,
    spawned: u64,
}

struct Supervisor {
    config: WorkerConfig,
    units: HashMap<u64, Unit>,
    queue: BinaryHeap<Queued>,
    next_unit: u64,
    next_seq: u64,
    /// Handed to per-job watchers so they can report back. Weak, so the
    /// supervisor stops once every [`WorkerPool`] handle is gone.
    commands: mpsc::WeakUnboundedSender<Command>,
    stats: watch::Sender<WorkerPoolStatistics>,
    counters: Counters,
    /// Unit threads not yet exited, detached ones included.
    live_threads: Arc<AtomicUsize>,
}

impl Supervisor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let period = self.config.maintenance_interval();
        let mut maintenance = interval_at(Instant::now() + period, period);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Shutdown { done }) => {
                        self.drain(&mut rx).await;
                        self.publish();
                        let _ = done.send(());
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = maintenance.tick() => self.maintain(Instant::now()),
            }
            self.publish();
        }

        self.publish();
        tracing::debug!("offload pool stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Submit {
                task,
                priority,
                deadline,
                timeout,
                reply,
            } => {
                if self.queue.len() >= self.config.queue_capacity {
                    let _ = reply.send(Err(OffloadError::QueueFull(self.queue.len())));
                    return;
                }
                let seq = self.next_seq;
                self.next_seq += 1;
                self.queue.push(Queued {
                    priority,
                    seq,
                    task,
                    deadline,
                    timeout,
                    reply,
                });
                self.dispatch();
                self.scale_up();
            }
            Command::Finished { unit_id, status } => self.finished(unit_id, status),
            Command::Shutdown { done } => {
                let _ = done.send(());
            }
        }
    }

    fn finished(&mut self, unit_id: u64, status: JobStatus) {
        match status {
            JobStatus::Completed => self.counters.completed += 1,
            JobStatus::Failed => self.counters.failed += 1,
            JobStatus::Crashed => self.counters.crashed += 1,
            JobStatus::TimedOut => self.counters.timed_out += 1,
        }

        match status {
            JobStatus::Completed | JobStatus::Failed => {
                if let Some(unit) = self.units.get_mut(&unit_id) {
                    unit.release(Instant::now());
                }
            }
            JobStatus::Crashed | JobStatus::TimedOut => {
                // Dropping the unit closes its channel; a stuck thread is left detached.
                if self.units.remove(&unit_id).is_some() {
                    tracing::warn!(unit = unit_id, ?status, "retiring offload unit");
                }
                if status == JobStatus::TimedOut {
                    let detached = self.detached();
                    if detached > self.config.max_workers {
                        tracing::warn!(detached, max_workers = self.config.max_workers, "stuck offload threads piling up");
                    }
                }
                self.ensure_minimum();
            }
        }

        self.dispatch();
        self.scale_up();
    }

    /// Hand queued tasks to idle units.
    fn dispatch(&mut self) {
        loop {
            let Some(unit_id) = self.units.values().filter(|u| !u.busy).map(|u| u.id).min() else {
                return;
            };
            let Some(item) = self.queue.pop() else {
                return;
            };

            if item.reply.is_closed() {
                continue;
            }
            let now = Instant::now();
            if item.deadline <= now {
                self.counters.timed_out += 1;
                let _ = item.reply.send(Err(OffloadError::TaskTimeout(item.timeout)));
                continue;
            }

            let (done, done_rx) = oneshot::channel();
            let job = Job { task: item.task, done };
            let Some(unit) = self.units.get_mut(&unit_id) else {
                return;
            };
            if let Err(job) = unit.assign(job) {
                // The thread is gone; requeue under the same sequence number.
                self.units.remove(&unit_id);
                self.queue.push(Queued {
                    task: job.task,
                    ..item
                });
                self.ensure_minimum();
                continue;
            }

            let watcher = tokio::spawn(watch_job(
                unit_id,
                done_rx,
                item.deadline,
                item.timeout,
                item.reply,
                self.commands.clone(),
            ));
            unit.supervisor = Some(watcher.abort_handle());
        }
    }

    fn scale_up(&mut self) {
        while self.queue.len() > self.units.len() && self.units.len() < self.config.max_workers {
            if !self.spawn_unit() {
                break;
            }
            self.dispatch();
        }
    }

    fn ensure_minimum(&mut self) {
        while self.units.len() < self.config.min_workers {
            if !self.spawn_unit() {
                break;
            }
        }
    }

    fn spawn_unit(&mut self) -> bool {
        let id = self.next_unit;
        self.next_unit += 1;
        match Unit::spawn(id, &self.live_threads) {
            Ok(unit) => {
                self.counters.spawned += 1;
                self.units.insert(id, unit);
                tracing::debug!(unit = id, workers = self.units.len(), "offload unit started");
                true
            }
            Err(error) => {
                tracing::warn!(%error, "failed to start offload unit");
                false
            }
        }
    }

    /// Tear down units idle past the idle window, keeping `min_workers`.
    fn maintain(&mut self, now: Instant) {
        let idle_timeout = self.config.idle_timeout();
        let mut idle: Vec<(Instant, u64)> = self
            .units
            .values()
            .filter(|u| !u.busy && now.saturating_duration_since(u.idle_since) >= idle_timeout)
            .map(|u| (u.idle_since, u.id))
            .collect();
        idle.sort();

        let surplus = self.units.len().saturating_sub(self.config.min_workers);
        for (_, id) in idle.into_iter().take(surplus) {
            self.units.remove(&id);
            tracing::debug!(unit = id, "idle offload unit stopped");
        }
    }

    async fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<Command>) {
        for item in self.queue.drain() {
            let _ = item.reply.send(Err(OffloadError::ShuttingDown));
        }

        let deadline = Instant::now() + self.config.shutdown_grace();
        while self.units.values().any(|u| u.busy) {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(Command::Finished { unit_id, status })) => self.finished(unit_id, status),
                Ok(Some(Command::Submit { reply, .. })) => {
                    let _ = reply.send(Err(OffloadError::ShuttingDown));
                }
                Ok(Some(Command::Shutdown { done })) => {
                    let _ = done.send(());
                }
                Ok(None) | Err(_) => break,
            }
        }

        let stragglers = self.units.values().filter(|u| u.busy).count();
        if stragglers > 0 {
            tracing::warn!(stragglers, "abandoning offload tasks past shutdown grace");
        }
        for unit in self.units.values_mut() {
            unit.abandon();
        }
        self.units.clear();
    }

    /// Threads of retired units that have not exited yet.
    fn detached(&self) -> usize {
        self.live_threads
            .load(AtomicOrdering::Relaxed)
            .saturating_sub(self.units.len())
    }

    fn publish(&self) {
        let workers = self.units.len();
        let busy = self.units.values().filter(|u| u.busy).count();
        let stats = WorkerPoolStatistics {
            workers,
            busy,
            queued: self.queue.len(),
            min_workers: self.config.min_workers,
            max_workers: self.config.max_workers,
            completed: self.counters.completed,
            failed: self.counters.failed,
            timed_out: self.counters.timed_out,
            crashed: self.counters.crashed,
            spawned: self.counters.spawned,
            detached: self.detached(),
            utilization: if workers == 0 { 0.0 } else { busy as f64 / workers as f64 },
        };
        self.stats.send_replace(stats);
    }
}

/// Wait on one job, answer the caller, and report the outcome to the supervisor.
async fn watch_job(
    unit_id: u64,
    done: oneshot::Receiver<UnitOutcome>,
    deadline: Instant,
    timeout: Duration,
    reply: Reply,
    commands: mpsc::WeakUnboundedSender<Command>,
) {
    let (status, result) = match timeout_at(deadline, done).await {
        Ok(Ok(UnitOutcome::Finished(Ok(value)))) => (JobStatus::Completed, Ok(value)),
        Ok(Ok(UnitOutcome::Finished(Err(message)))) => (JobStatus::Failed, Err(OffloadError::TaskFailed(message))),
        Ok(Ok(UnitOutcome::Panicked(message))) => (JobStatus::Crashed, Err(OffloadError::WorkerCrash(message))),
        Ok(Err(_)) => (
            JobStatus::Crashed,
            Err(OffloadError::WorkerCrash("execution unit exited".to_string())),
        ),
        Err(_) => {
            tracing::warn!(unit = unit_id, ?timeout, "offload task timed out");
            (JobStatus::TimedOut, Err(OffloadError::TaskTimeout(timeout)))
        }
    };
    let _ = reply.send(result);
    if let Some(commands) = commands.upgrade() {
        let _ = commands.send(Command::Finished { unit_id, status });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn config(min: usize, max: usize) -> WorkerConfig {
        WorkerConfig {
            min_workers: min,
            max_workers: max,
            default_timeout_ms: 2_000,
            idle_timeout_secs: 0,
            shutdown_grace_ms: 500,
            queue_capacity: 16,
            maintenance_interval_secs: 1,
        }
    }

    fn quick(value: i64) -> OffloadTask {
        OffloadTask::new("quick", move || Ok(json!(value)))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn executes_and_counts() {
        let pool = WorkerPool::start(config(2, 2));
        let value = pool.execute(quick(7), ExecuteOptions::default()).await.unwrap();
        assert_eq!(value, json!(7));

        let err = pool
            .execute(OffloadTask::new("bad", || Err("nope".to_string())), ExecuteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, OffloadError::TaskFailed("nope".to_string()));

        settle().await;
        let stats = pool.statistics();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.busy, 0);
    }

    #[tokio::test]
    async fn stuck_task_times_out_and_pool_recovers() {
        let pool = WorkerPool::start(config(1, 1));
        let (_hold, gate) = std::sync::mpsc::channel::<()>();
        let stuck = OffloadTask::new("stuck", move || {
            let _ = gate.recv();
            Ok(Value::Null)
        });

        let started = Instant::now();
        let err = pool
            .execute(stuck, ExecuteOptions::new(Priority::Normal, Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err, OffloadError::TaskTimeout(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_millis(500));

        // The only unit was stuck; a replacement must serve the next task.
        let value = pool.execute(quick(1), ExecuteOptions::default()).await.unwrap();
        assert_eq!(value, json!(1));

        let stats = pool.statistics();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.spawned, 2);
    }

    #[tokio::test]
    async fn stuck_thread_is_reported_detached_until_it_returns() {
        let pool = WorkerPool::start(config(1, 1));
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let stuck = OffloadTask::new("stuck", move || {
            let _ = gate.recv();
            Ok(Value::Null)
        });

        let err = pool
            .execute(stuck, ExecuteOptions::new(Priority::Normal, Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, OffloadError::TaskTimeout(_)));
        settle().await;
        let stats = pool.statistics();
        assert_eq!(stats.detached, 1);
        assert_eq!(stats.workers, 1);

        release.send(()).unwrap();
        settle().await;
        pool.execute(quick(3), ExecuteOptions::default()).await.unwrap();
        settle().await;
        assert_eq!(pool.statistics().detached, 0);
    }

    #[tokio::test]
    async fn panic_fails_only_its_task() {
        let pool = WorkerPool::start(config(1, 1));
        let err = pool
            .execute(OffloadTask::new("boom", || panic!("kaboom")), ExecuteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, OffloadError::WorkerCrash("kaboom".to_string()));

        let value = pool.execute(quick(2), ExecuteOptions::default()).await.unwrap();
        assert_eq!(value, json!(2));
        assert_eq!(pool.statistics().crashed, 1);
    }

    #[tokio::test]
    async fn queue_is_priority_then_fifo() {
        let pool = WorkerPool::start(config(1, 1));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = std::sync::mpsc::channel::<()>();

        let record = |name: &'static str| {
            let order = Arc::clone(&order);
            OffloadTask::new(name, move || {
                order.lock().unwrap().push(name);
                Ok(Value::Null)
            })
        };

        let blocker = pool
            .submit(
                OffloadTask::new("blocker", move || {
                    let _ = gate.recv();
                    Ok(Value::Null)
                }),
                ExecuteOptions::default(),
            )
            .unwrap();
        let a = pool.submit(record("a"), ExecuteOptions::default()).unwrap();
        let b = pool.submit(record("b"), ExecuteOptions::default()).unwrap();
        let c = pool
            .submit(record("c"), ExecuteOptions { priority: Priority::High, timeout: None })
            .unwrap();

        settle().await;
        release.send(()).unwrap();

        blocker.wait().await.unwrap();
        a.wait().await.unwrap();
        b.wait().await.unwrap();
        c.wait().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn scales_up_under_backlog_and_back_down_when_idle() {
        let pool = WorkerPool::start(config(1, 3));
        let pending: Vec<PendingTask> = (0..5)
            .map(|i| {
                pool.submit(
                    OffloadTask::new("sleepy", move || {
                        std::thread::sleep(Duration::from_millis(100));
                        Ok(json!(i))
                    }),
                    ExecuteOptions::default(),
                )
                .unwrap()
            })
            .collect();

        settle().await;
        assert_eq!(pool.statistics().workers, 3);

        for task in pending {
            task.wait().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let stats = pool.statistics();
        assert_eq!(stats.workers, 1);
        assert_eq!(stats.spawned, 3);
        assert_eq!(stats.completed, 5);
    }

    #[tokio::test]
    async fn queue_capacity_is_enforced() {
        let mut cfg = config(1, 1);
        cfg.queue_capacity = 1;
        let pool = WorkerPool::start(cfg);
        let (release, gate) = std::sync::mpsc::channel::<()>();

        let blocker = pool
            .submit(
                OffloadTask::new("blocker", move || {
                    let _ = gate.recv();
                    Ok(Value::Null)
                }),
                ExecuteOptions::default(),
            )
            .unwrap();
        let queued = pool.submit(quick(1), ExecuteOptions::default()).unwrap();
        let rejected = pool.submit(quick(2), ExecuteOptions::default()).unwrap();

        assert_eq!(rejected.wait().await.unwrap_err(), OffloadError::QueueFull(1));
        release.send(()).unwrap();
        blocker.wait().await.unwrap();
        assert_eq!(queued.wait().await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let pool = WorkerPool::start(config(1, 2));
        pool.execute(quick(1), ExecuteOptions::default()).await.unwrap();
        pool.shutdown().await;

        let err = pool.execute(quick(2), ExecuteOptions::default()).await.unwrap_err();
        assert_eq!(err, OffloadError::ShuttingDown);
        assert_eq!(pool.statistics().workers, 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_task_finishing_within_grace() {
        let pool = WorkerPool::start(config(1, 1));
        let pending = pool
            .submit(
                OffloadTask::new("finishing", || {
                    std::thread::sleep(Duration::from_millis(100));
                    Ok(json!("done"))
                }),
                ExecuteOptions::default(),
            )
            .unwrap();
        settle().await;
        assert_eq!(pool.statistics().busy, 1);

        let (result, ()) = tokio::join!(pending.wait(), pool.shutdown());
        assert_eq!(result.unwrap(), json!("done"));
        let stats = pool.statistics();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.workers, 0);
    }

    #[tokio::test]
    async fn shutdown_abandons_stragglers_at_grace_timeout() {
        let mut cfg = config(1, 1);
        cfg.shutdown_grace_ms = 200;
        let pool = WorkerPool::start(cfg);
        let (_hold, gate) = std::sync::mpsc::channel::<()>();
        let pending = pool
            .submit(
                OffloadTask::new("blocked", move || {
                    let _ = gate.recv();
                    Ok(Value::Null)
                }),
                ExecuteOptions::default(),
            )
            .unwrap();
        settle().await;

        let started = Instant::now();
        pool.shutdown().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(1_000));

        assert_eq!(pending.wait().await.unwrap_err(), OffloadError::ShuttingDown);
        assert_eq!(pool.statistics().workers, 0);
    }
}
