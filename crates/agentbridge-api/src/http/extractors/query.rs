//! Query parameter extractors.

use agentbridge_core::history::HistoryFilter;
use serde::Deserialize;

/// Hard ceiling on `limit` for history queries.
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// `GET /api/v1/history` parameters.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    /// Most recent matches to return.
    pub limit: Option<usize>,
    /// Envelopes sent by or addressed to this agent.
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub intent: Option<String>,
}

impl HistoryQuery {
    pub fn into_filter(self) -> HistoryFilter {
        HistoryFilter {
            agent_id: non_empty(self.agent_id),
            task_id: non_empty(self.task_id),
            intent: non_empty(self.intent),
            limit: Some(self.limit.unwrap_or(100).min(MAX_HISTORY_LIMIT)),
        }
    }
}

/// `POST /api/v1/envelopes` parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuery {
    /// Queue for an offline recipient instead of failing. Defaults to true.
    #[serde(default = "default_true")]
    pub allow_queue: bool,
}

impl Default for SubmitQuery {
    fn default() -> Self {
        Self { allow_queue: true }
    }
}

/// `DELETE /api/v1/clients/{id}` parameters.
#[derive(Debug, Deserialize, Default)]
pub struct DisconnectQuery {
    /// Also drop the client's offline queue.
    #[serde(default)]
    pub permanent: bool,
}

fn default_true() -> bool {
    true
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
