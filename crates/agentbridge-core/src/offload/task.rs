//! Units of offloaded work.

use std::fmt;
use std::time::Duration;

use agentbridge_types::envelope::Priority;
use serde_json::Value;

/// What a task returns: a JSON value, or a failure message.
pub type TaskResult = Result<Value, String>;

/// A CPU-bound closure shipped to an execution unit.
///
/// The closure owns everything it touches; nothing in it may reference
/// control-plane state.
pub struct OffloadTask {
    label: String,
    work: Box<dyn FnOnce() -> TaskResult + Send + 'static>,
}

impl OffloadTask {
    pub fn new(label: impl Into<String>, work: impl FnOnce() -> TaskResult + Send + 'static) -> Self {
        Self {
            label: label.into(),
            work: Box::new(work),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn run(self) -> TaskResult {
        (self.work)()
    }
}

impl fmt::Debug for OffloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadTask").field("label", &self.label).finish_non_exhaustive()
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub priority: Priority,
    /// Falls back to the pool's default timeout when `None`.
    pub timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn new(priority: Priority, timeout: Duration) -> Self {
        Self {
            priority,
            timeout: Some(timeout),
        }
    }
}
