//! Fixed-capacity circular log of accepted envelopes.
//!
//! Entries are shared read-only (`Arc<Envelope>`); nothing is mutated after
//! insertion. When full, each push overwrites the oldest entry.

use std::collections::VecDeque;

use agentbridge_types::envelope::Envelope;

/// Items whose retained size can be estimated.
pub trait Weighted {
    fn weight(&self) -> usize;
}

/// Ring buffer with a capacity fixed at construction.
#[derive(Debug)]
pub struct HistoryBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
    bytes: usize,
}

impl<T: Weighted + Clone> HistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            bytes: 0,
        }
    }

    /// Append an entry, returning the one it evicted when at capacity.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            let old = self.entries.pop_front();
            if let Some(old) = &old {
                self.bytes = self.bytes.saturating_sub(old.weight());
            }
            old
        } else {
            None
        };
        self.bytes += entry.weight();
        self.entries.push_back(entry);
        evicted
    }

    /// The newest `limit` entries (all when `None`), oldest first.
    pub fn to_vec(&self, limit: Option<usize>) -> Vec<T> {
        let take = limit.unwrap_or(self.entries.len()).min(self.entries.len());
        self.entries.iter().skip(self.entries.len() - take).cloned().collect()
    }

    /// The newest `limit` entries matching `predicate`, oldest first.
    ///
    /// Scans newest-first and stops as soon as `limit` matches are found.
    pub fn filter<F>(&self, mut predicate: F, limit: Option<usize>) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let limit = limit.unwrap_or(usize::MAX);
        let mut found = Vec::new();
        for entry in self.entries.iter().rev() {
            if found.len() >= limit {
                break;
            }
            if predicate(entry) {
                found.push(entry.clone());
            }
        }
        found.reverse();
        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Estimated bytes retained by the buffer.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Collaborator-facing history query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Matches envelopes sent by or addressed to this agent.
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub intent: Option<String>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn is_empty(&self) -> bool {
        self.agent_id.is_none() && self.task_id.is_none() && self.intent.is_none()
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        if let Some(agent) = &self.agent_id {
            if envelope.from != *agent && envelope.to.as_deref() != Some(agent.as_str()) {
                return false;
            }
        }
        if let Some(task) = &self.task_id {
            if envelope.task_id.as_deref() != Some(task.as_str()) {
                return false;
            }
        }
        if let Some(intent) = &self.intent {
            if envelope.intent != *intent {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
