//! Configuration types for agentbridge.
//!
//! `BridgeConfig` mirrors `config.toml`. Every field has a default, so an
//! empty or partial file is valid; [`BridgeConfig::validate`] clamps values
//! that would make the hub misbehave.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the hub process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub pool: PoolConfig,
    pub memory: MemoryConfig,
    pub workers: WorkerConfig,
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7420,
        }
    }
}

/// Control-plane settings: registry, history, offline queue, cycles, offload triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Concurrent-connection ceiling; registration beyond it fails.
    pub max_connections: usize,
    pub history_capacity: usize,
    /// Recent envelopes replayed in the `registered` reply.
    pub history_replay: usize,
    /// Maximum envelopes per offline-queue flush batch.
    pub offline_batch_size: usize,
    /// Per-recipient offline queue limit; the oldest entry is dropped beyond it.
    pub offline_queue_limit: usize,
    /// Outbound frames buffered per connection before sends count as failures.
    pub outbound_buffer: usize,
    pub heartbeat_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Idle time after which a closed connection is evicted by the cleanup cycle.
    pub stale_after_secs: u64,
    /// Silence after which a client is reported `idle` rather than `active`.
    pub idle_after_secs: u64,
    /// Serialized payload size above which an envelope is offloaded.
    pub heavy_payload_bytes: usize,
    /// Serialized payload size above which an envelope is rejected.
    pub max_payload_bytes: usize,
    /// Intents that always require an offloaded transform.
    pub transform_intents: Vec<String>,
    /// Command channel depth of the control-plane loop.
    pub command_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            history_capacity: 1000,
            history_replay: 50,
            offline_batch_size: 100,
            offline_queue_limit: 1000,
            outbound_buffer: 256,
            heartbeat_interval_secs: 30,
            cleanup_interval_secs: 60,
            stale_after_secs: 300,
            idle_after_secs: 60,
            heavy_payload_bytes: 64 * 1024,
            max_payload_bytes: 8 * 1024 * 1024,
            transform_intents: vec!["payload.compact".to_string(), "payload.digest".to_string()],
            command_buffer: 1024,
        }
    }
}

impl HubConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs)
    }
}

/// Object pool sizing and maintenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Objects constructed up front.
    pub initial_size: usize,
    /// Free-list ceiling; released objects beyond it are discarded.
    pub max_size: usize,
    /// Floor that maintenance never shrinks below.
    pub min_size: usize,
    pub max_idle_secs: u64,
    /// Utilization below which maintenance shrinks the free list.
    pub shrink_threshold: f64,
    pub maintenance_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 16,
            max_size: 256,
            min_size: 8,
            max_idle_secs: 300,
            shrink_threshold: 0.25,
            maintenance_interval_secs: 60,
        }
    }
}

impl PoolConfig {
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Memory pressure thresholds, leak detection, and collection throttling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Ratio at or above which pressure is at least `moderate`.
    pub warning_ratio: f64,
    /// Ratio at or above which pressure is at least `high`.
    pub critical_ratio: f64,
    /// Budget for hub-held envelope bytes (history + offline queues).
    pub heap_budget_bytes: u64,
    /// Number of samples kept for leak-trend detection.
    pub sample_window: usize,
    /// Sustained RSS growth rate that raises a leak warning.
    pub leak_rate_bytes_per_min: u64,
    /// When false, pressure only raises alerts and never reclaims.
    pub collection_enabled: bool,
    pub collection_cooldown_secs: u64,
    pub max_collections_per_window: u32,
    pub collection_window_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warning_ratio: 0.70,
            critical_ratio: 0.90,
            heap_budget_bytes: 256 * 1024 * 1024,
            sample_window: 12,
            leak_rate_bytes_per_min: 1024 * 1024,
            collection_enabled: true,
            collection_cooldown_secs: 30,
            max_collections_per_window: 3,
            collection_window_secs: 300,
        }
    }
}

impl MemoryConfig {
    pub fn collection_cooldown(&self) -> Duration {
        Duration::from_secs(self.collection_cooldown_secs)
    }

    pub fn collection_window(&self) -> Duration {
        Duration::from_secs(self.collection_window_secs)
    }
}

/// Worker offload pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub default_timeout_ms: u64,
    /// Idle time after which units beyond `min_workers` are torn down.
    pub idle_timeout_secs: u64,
    pub shutdown_grace_ms: u64,
    /// Tasks waiting for a unit; submissions beyond it fail fast.
    pub queue_capacity: usize,
    pub maintenance_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            min_workers: 2,
            max_workers: cpus.max(2),
            default_timeout_ms: 5_000,
            idle_timeout_secs: 60,
            shutdown_grace_ms: 5_000,
            queue_capacity: 1024,
            maintenance_interval_secs: 15,
        }
    }
}

impl WorkerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    pub otel: bool,
}

impl BridgeConfig {
    /// Clamp incoherent values in place.
    ///
    /// Returns a human-readable description of every adjustment so the caller
    /// can log them.
    pub fn validate(&mut self) -> Vec<String> {
        let mut notes = Vec::new();

        let hub = &mut self.hub;
        clamp_min(&mut hub.max_connections, 1, "hub.max_connections", &mut notes);
        clamp_min(&mut hub.history_capacity, 1, "hub.history_capacity", &mut notes);
        clamp_min(&mut hub.offline_batch_size, 1, "hub.offline_batch_size", &mut notes);
        clamp_min(&mut hub.offline_queue_limit, 1, "hub.offline_queue_limit", &mut notes);
        clamp_min(&mut hub.outbound_buffer, 1, "hub.outbound_buffer", &mut notes);
        clamp_min(&mut hub.command_buffer, 1, "hub.command_buffer", &mut notes);
        if hub.history_replay > hub.history_capacity {
            notes.push(format!(
                "hub.history_replay {} exceeds history_capacity, using {}",
                hub.history_replay, hub.history_capacity
            ));
            hub.history_replay = hub.history_capacity;
        }
        if hub.heartbeat_interval_secs == 0 {
            notes.push("hub.heartbeat_interval_secs must be positive, using 30".to_string());
            hub.heartbeat_interval_secs = 30;
        }
        if hub.cleanup_interval_secs == 0 {
            notes.push("hub.cleanup_interval_secs must be positive, using 60".to_string());
            hub.cleanup_interval_secs = 60;
        }
        if hub.heavy_payload_bytes > hub.max_payload_bytes {
            notes.push(format!(
                "hub.heavy_payload_bytes {} exceeds max_payload_bytes, using {}",
                hub.heavy_payload_bytes, hub.max_payload_bytes
            ));
            hub.heavy_payload_bytes = hub.max_payload_bytes;
        }

        let pool = &mut self.pool;
        clamp_min(&mut pool.max_size, 1, "pool.max_size", &mut notes);
        if pool.min_size > pool.max_size {
            notes.push(format!("pool.min_size {} exceeds max_size, using {}", pool.min_size, pool.max_size));
            pool.min_size = pool.max_size;
        }
        if pool.initial_size > pool.max_size {
            notes.push(format!(
                "pool.initial_size {} exceeds max_size, using {}",
                pool.initial_size, pool.max_size
            ));
            pool.initial_size = pool.max_size;
        }
        if !(0.0..=1.0).contains(&pool.shrink_threshold) {
            notes.push(format!("pool.shrink_threshold {} out of range, using 0.25", pool.shrink_threshold));
            pool.shrink_threshold = 0.25;
        }
        if pool.maintenance_interval_secs == 0 {
            notes.push("pool.maintenance_interval_secs must be positive, using 60".to_string());
            pool.maintenance_interval_secs = 60;
        }

        let memory = &mut self.memory;
        let ratios_valid = memory.warning_ratio > 0.0
            && memory.warning_ratio < memory.critical_ratio
            && memory.critical_ratio <= 1.0;
        if !ratios_valid {
            notes.push(format!(
                "memory ratios warning={} critical={} are incoherent, using 0.70/0.90",
                memory.warning_ratio, memory.critical_ratio
            ));
            memory.warning_ratio = 0.70;
            memory.critical_ratio = 0.90;
        }
        clamp_min(&mut memory.sample_window, 2, "memory.sample_window", &mut notes);
        if memory.heap_budget_bytes == 0 {
            notes.push("memory.heap_budget_bytes must be positive, using 256 MiB".to_string());
            memory.heap_budget_bytes = 256 * 1024 * 1024;
        }

        let workers = &mut self.workers;
        clamp_min(&mut workers.max_workers, 1, "workers.max_workers", &mut notes);
        if workers.min_workers > workers.max_workers {
            notes.push(format!(
                "workers.min_workers {} exceeds max_workers, using {}",
                workers.min_workers, workers.max_workers
            ));
            workers.min_workers = workers.max_workers;
        }
        clamp_min(&mut workers.queue_capacity, 1, "workers.queue_capacity", &mut notes);
        if workers.default_timeout_ms == 0 {
            notes.push("workers.default_timeout_ms must be positive, using 5000".to_string());
            workers.default_timeout_ms = 5_000;
        }
        if workers.maintenance_interval_secs == 0 {
            notes.push("workers.maintenance_interval_secs must be positive, using 15".to_string());
            workers.maintenance_interval_secs = 15;
        }

        notes
    }
}

fn clamp_min(value: &mut usize, min: usize, name: &str, notes: &mut Vec<String>) {
    if *value < min {
        notes.push(format!("{name} {} below minimum, using {min}", *value));
        *value = min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut config = BridgeConfig::default();
        assert!(config.validate().is_empty());
        assert_eq!(config.server.port, 7420);
        assert_eq!(config.hub.history_capacity, 1000);
        assert!(config.workers.max_workers >= 2);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
[server]
port = 9000

[hub]
history_capacity = 10
transform_intents = ["custom.transform"]

[logging]
format = "json"
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.hub.history_capacity, 10);
        assert_eq!(config.hub.transform_intents, vec!["custom.transform"]);
        assert_eq!(config.hub.offline_batch_size, 100);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn validate_clamps_incoherent_values() {
        let mut config = BridgeConfig::default();
        config.workers.min_workers = 8;
        config.workers.max_workers = 4;
        config.memory.warning_ratio = 0.95;
        config.memory.critical_ratio = 0.9;
        config.pool.min_size = 500;
        config.hub.history_capacity = 0;

        let notes = config.validate();
        assert_eq!(notes.len(), 5);
        assert_eq!(config.workers.min_workers, 4);
        assert!((config.memory.warning_ratio - 0.70).abs() < f64::EPSILON);
        assert_eq!(config.pool.min_size, config.pool.max_size);
        assert_eq!(config.hub.history_capacity, 1);
        assert_eq!(config.hub.history_replay, 1);
    }

    #[test]
    fn duration_helpers() {
        let config = BridgeConfig::default();
        assert_eq!(config.hub.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.workers.default_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.pool.max_idle(), Duration::from_secs(300));
    }
}
