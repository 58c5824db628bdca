//! Metric snapshots exposed to collaborators (HTTP surface, CLI).
//!
//! All snapshot types are plain data: producing one never blocks the hub
//! beyond copying counters.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics reported by one object pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatistics {
    pub acquisitions: u64,
    pub hits: u64,
    pub misses: u64,
    pub releases: u64,
    /// Released objects dropped because the free list was full.
    pub discarded: u64,
    /// Free objects evicted by maintenance.
    pub evicted: u64,
    pub created: u64,
    /// Objects currently on the free list.
    pub size: usize,
    /// Objects currently acquired and not yet released.
    pub in_use: usize,
    pub max_size: usize,
    /// `hits / acquisitions`, 0 when nothing was acquired yet.
    pub hit_rate: f64,
    /// `in_use / (in_use + size)`, 0 when the pool holds nothing.
    pub utilization: f64,
}

/// Statistics reported by the worker offload pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolStatistics {
    pub workers: usize,
    pub busy: usize,
    pub queued: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub crashed: u64,
    /// Units started over the pool lifetime, replacements included.
    pub spawned: u64,
    /// Retired unit threads still stuck in a job.
    #[serde(default)]
    pub detached: usize,
    pub utilization: f64,
}

/// Memory pressure classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PressureLevel {
    #[default]
    Low,
    Moderate,
    High,
    Critical,
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Latest memory reading and its classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub level: PressureLevel,
    /// Hub-held envelope bytes over the configured heap budget.
    pub heap_ratio: f64,
    /// Process RSS over total system memory.
    pub resident_ratio: f64,
    pub heap_used_bytes: u64,
    pub resident_bytes: u64,
    pub collections: u64,
    /// Sustained growth rate when a leak trend is currently suspected.
    pub leak_rate_bytes_per_min: Option<f64>,
    pub sampled_at: Option<DateTime<Utc>>,
}

/// Aggregate hub metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubMetrics {
    pub messages_accepted: u64,
    pub messages_delivered: u64,
    pub messages_queued: u64,
    pub messages_dropped: u64,
    pub messages_offloaded: u64,
    pub errors: u64,
    pub connections_total: u64,
    pub connections_active: usize,
    pub offline_queue_depth: usize,
    pub offline_recipients: usize,
    pub history_len: usize,
    pub history_capacity: usize,
    /// Envelopes waiting behind an in-flight offload.
    pub staged: usize,
    pub pools: BTreeMap<String, PoolStatistics>,
    pub workers: WorkerPoolStatistics,
    pub memory: MemorySnapshot,
    pub uptime_secs: u64,
}
