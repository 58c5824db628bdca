//! Worker offload pool for CPU-heavy payload transforms.
//!
//! The only part of the hub with real parallelism. Execution units are OS
//! threads; work crosses into them as owned [`OffloadTask`]s and comes back
//! as a `Result` over a channel.

pub mod pool;
pub mod task;
pub mod transform;
mod unit;

pub use pool::{PendingTask, WorkerPool};
pub use task::{ExecuteOptions, OffloadTask, TaskResult};
pub use transform::TransformKind;
