//! Per-recipient offline queues.
//!
//! Each recipient with undelivered envelopes owns exactly one FIFO container
//! taken from an [`ObjectPool`]. A container that becomes empty goes back to
//! the pool immediately, so no empty queues linger.

use std::collections::{HashMap, VecDeque};

use agentbridge_types::config::PoolConfig;
use agentbridge_types::metrics::PoolStatistics;
use tokio::time::Instant;

use crate::envelope::TrackedEnvelope;
use crate::history::Weighted;
use crate::pool::ObjectPool;

type Container = VecDeque<TrackedEnvelope>;

#[derive(Debug)]
pub struct OfflineQueue {
    queues: HashMap<String, Container>,
    containers: ObjectPool<Container>,
    /// Per-recipient limit; the oldest entry is dropped beyond it.
    limit: usize,
    bytes: usize,
}

impl OfflineQueue {
    pub fn new(limit: usize, pool: PoolConfig) -> Self {
        Self {
            queues: HashMap::new(),
            containers: ObjectPool::new("offline_queue", pool, VecDeque::new),
            limit: limit.max(1),
            bytes: 0,
        }
    }

    /// Park an envelope for `recipient`. Returns the entry dropped to stay
    /// within the per-recipient limit, if any.
    pub fn enqueue(&mut self, recipient: &str, entry: TrackedEnvelope) -> Option<TrackedEnvelope> {
        if !self.queues.contains_key(recipient) {
            let container = self.containers.acquire();
            self.queues.insert(recipient.to_string(), container);
        }
        let queue = self.queues.get_mut(recipient)?;

        let dropped = if queue.len() >= self.limit {
            queue.pop_front()
        } else {
            None
        };
        if let Some(old) = &dropped {
            self.bytes = self.bytes.saturating_sub(old.weight());
        }
        self.bytes += entry.weight();
        queue.push_back(entry);
        dropped
    }

    /// Take up to `max` entries for `recipient`, oldest first.
    pub fn dequeue(&mut self, recipient: &str, max: usize) -> Vec<TrackedEnvelope> {
        let Some(queue) = self.queues.get_mut(recipient) else {
            return Vec::new();
        };
        let take = max.min(queue.len());
        let batch: Vec<TrackedEnvelope> = queue.drain(..take).collect();
        let freed: usize = batch.iter().map(Weighted::weight).sum();
        self.bytes = self.bytes.saturating_sub(freed);
        if queue.is_empty() {
            self.release(recipient);
        }
        batch
    }

    /// Put a batch back at the head of `recipient`'s queue, keeping its order.
    ///
    /// Used when a flush could not be sent. Ignores the per-recipient limit.
    pub fn requeue_front(&mut self, recipient: &str, batch: Vec<TrackedEnvelope>) {
        if batch.is_empty() {
            return;
        }
        if !self.queues.contains_key(recipient) {
            let container = self.containers.acquire();
            self.queues.insert(recipient.to_string(), container);
        }
        let Some(queue) = self.queues.get_mut(recipient) else {
            return;
        };
        for entry in batch.into_iter().rev() {
            self.bytes += entry.weight();
            queue.push_front(entry);
        }
    }

    /// Drop everything queued for `recipient`. Returns the number dropped.
    pub fn clear(&mut self, recipient: &str) -> usize {
        match self.queues.get(recipient) {
            Some(queue) => {
                let count = queue.len();
                let freed: usize = queue.iter().map(Weighted::weight).sum();
                self.bytes = self.bytes.saturating_sub(freed);
                self.release(recipient);
                count
            }
            None => 0,
        }
    }

    fn release(&mut self, recipient: &str) {
        if let Some(container) = self.queues.remove(recipient) {
            self.containers.release(container);
        }
    }

    pub fn has_pending(&self, recipient: &str) -> bool {
        self.queues.contains_key(recipient)
    }

    pub fn depth(&self, recipient: &str) -> usize {
        self.queues.get(recipient).map_or(0, VecDeque::len)
    }

    pub fn total_depth(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Recipients with at least one pending entry.
    pub fn recipients(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    pub fn recipient_count(&self) -> usize {
        self.queues.len()
    }

    /// Estimated bytes held across all queues.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn maintain(&mut self, now: Instant) -> usize {
        self.containers.maintain(now)
    }

    /// Release spare capacity: trim live containers and drain the pool to its floor.
    pub fn shrink(&mut self) -> usize {
        for queue in self.queues.values_mut() {
            queue.shrink_to_fit();
        }
        self.containers.drain_to_floor()
    }

    pub fn pool_statistics(&self) -> PoolStatistics {
        self.containers.statistics()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::tests::tracked;

    fn pool() -> PoolConfig {
        PoolConfig {
            initial_size: 2,
            max_size: 8,
            min_size: 1,
            ..PoolConfig::default()
        }
    }

    fn ids(batch: &[TrackedEnvelope]) -> Vec<String> {
        batch.iter().map(|t| t.envelope.id.clone()).collect()
    }

    #[test]
    fn fifo_per_recipient() {
        let mut queue = OfflineQueue::new(10, pool());
        for i in 0..5 {
            queue.enqueue("b", tracked(&format!("b{i}"), Some("b")));
        }
        queue.enqueue("c", tracked("c0", Some("c")));

        assert_eq!(ids(&queue.dequeue("b", 3)), vec!["b0", "b1", "b2"]);
        assert_eq!(ids(&queue.dequeue("b", 10)), vec!["b3", "b4"]);
        assert_eq!(queue.depth("c"), 1);
    }

    #[test]
    fn empty_container_is_released_immediately() {
        let mut queue = OfflineQueue::new(10, pool());
        queue.enqueue("b", tracked("1", Some("b")));
        assert!(queue.has_pending("b"));
        assert_eq!(queue.pool_statistics().in_use, 1);

        queue.dequeue("b", 10);
        assert!(!queue.has_pending("b"));
        assert_eq!(queue.recipient_count(), 0);
        let stats = queue.pool_statistics();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.releases, 1);
        assert_eq!(queue.bytes(), 0);
    }

    #[test]
    fn limit_drops_oldest() {
        let mut queue = OfflineQueue::new(2, pool());
        assert!(queue.enqueue("b", tracked("1", Some("b"))).is_none());
        assert!(queue.enqueue("b", tracked("2", Some("b"))).is_none());
        let dropped = queue.enqueue("b", tracked("3", Some("b"))).unwrap();
        assert_eq!(dropped.envelope.id, "1");
        assert_eq!(ids(&queue.dequeue("b", 10)), vec!["2", "3"]);
    }

    #[test]
    fn requeue_front_preserves_order() {
        let mut queue = OfflineQueue::new(10, pool());
        for id in ["1", "2", "3", "4"] {
            queue.enqueue("b", tracked(id, Some("b")));
        }
        let batch = queue.dequeue("b", 2);
        let bytes_before = queue.bytes();
        queue.requeue_front("b", batch);
        assert!(queue.bytes() > bytes_before);
        assert_eq!(ids(&queue.dequeue("b", 10)), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn clear_drops_everything_for_recipient() {
        let mut queue = OfflineQueue::new(10, pool());
        queue.enqueue("b", tracked("1", Some("b")));
        queue.enqueue("b", tracked("2", Some("b")));
        queue.enqueue("c", tracked("3", Some("c")));

        assert_eq!(queue.clear("b"), 2);
        assert_eq!(queue.clear("b"), 0);
        assert_eq!(queue.total_depth(), 1);
        assert_eq!(queue.recipients(), vec!["c".to_string()]);
    }
}
