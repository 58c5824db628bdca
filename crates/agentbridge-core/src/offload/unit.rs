//! A single execution unit: one OS thread fed through a channel.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::task::{OffloadTask, TaskResult};

/// How a unit finished a job.
#[derive(Debug)]
pub(crate) enum UnitOutcome {
    Finished(TaskResult),
    /// The task panicked; the unit has exited.
    Panicked(String),
}

pub(crate) struct Job {
    pub task: OffloadTask,
    pub done: oneshot::Sender<UnitOutcome>,
}

/// Decrements the live thread count when a unit thread exits.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, AtomicOrdering::Relaxed);
    }
}

/// Control-side handle of a running unit.
///
/// Dropping it closes the job channel; the thread exits once its current job
/// returns. A thread stuck in a job is detached, never joined: safe Rust
/// cannot kill it, so it keeps its OS thread until the job returns. The
/// `live` counter passed to [`Unit::spawn`] tracks such threads.
pub(crate) struct Unit {
    pub id: u64,
    jobs: mpsc::UnboundedSender<Job>,
    pub busy: bool,
    pub idle_since: Instant,
    pub supervisor: Option<tokio::task::AbortHandle>,
}

impl Unit {
    /// Start the thread. `live` counts unit threads that have not exited.
    pub fn spawn(id: u64, live: &Arc<AtomicUsize>) -> std::io::Result<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        live.fetch_add(1, AtomicOrdering::Relaxed);
        let guard = LiveGuard(Arc::clone(live));
        thread::Builder::new()
            .name(format!("offload-{id}"))
            .spawn(move || {
                let _guard = guard;
                while let Some(job) = rx.blocking_recv() {
                    let label = job.task.label().to_string();
                    match panic::catch_unwind(AssertUnwindSafe(|| job.task.run())) {
                        Ok(result) => {
                            let _ = job.done.send(UnitOutcome::Finished(result));
                        }
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            tracing::warn!(unit = id, task = %label, %message, "offload task panicked");
                            let _ = job.done.send(UnitOutcome::Panicked(message));
                            break;
                        }
                    }
                }
            })?;
        Ok(Self {
            id,
            jobs,
            busy: false,
            idle_since: Instant::now(),
            supervisor: None,
        })
    }

    /// Hand a job to the thread. Gives the job back if the thread is gone.
    pub fn assign(&mut self, job: Job) -> Result<(), Job> {
        self.jobs.send(job).map_err(|e| e.0)?;
        self.busy = true;
        Ok(())
    }

    pub fn release(&mut self, now: Instant) {
        self.busy = false;
        self.idle_since = now;
        self.supervisor = None;
    }

    /// Stop waiting on the current job, if any.
    pub fn abandon(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
