//! Pressure classification, throttled collection requests, and leak trends.

use std::collections::VecDeque;
use std::time::Duration;

use agentbridge_types::config::MemoryConfig;
use agentbridge_types::metrics::{MemorySnapshot, PressureLevel};
use chrono::Utc;
use tokio::time::Instant;

use super::sampler::{MemorySampler, SamplerKind};

/// Result of one [`MemoryMonitor::check_pressure`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureReading {
    pub level: PressureLevel,
    /// The level before this check, when it changed.
    pub previous: Option<PressureLevel>,
    pub heap_ratio: f64,
    pub resident_ratio: f64,
}

impl PressureReading {
    pub fn changed(&self) -> bool {
        self.previous.is_some()
    }
}

/// Outcome of a collection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionDecision {
    /// The caller should reclaim now.
    Granted,
    /// A collection ran recently.
    CoolingDown { remaining: Duration },
    /// The per-window cap is used up.
    Exhausted,
    /// Collection is disabled; the request only raises an alert.
    AlertOnly,
}

impl CollectionDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Per-hub memory pressure monitor. Constructed explicitly and owned by the
/// router; there is no process-wide instance.
pub struct MemoryMonitor {
    config: MemoryConfig,
    sampler: Box<dyn MemorySampler>,
    level: PressureLevel,
    /// `(taken at, bytes)`; RSS when the sampler has it, hub heap otherwise.
    samples: VecDeque<(Instant, u64)>,
    grants: VecDeque<Instant>,
    collections: u64,
    leak_rate: Option<f64>,
    snapshot: MemorySnapshot,
}

impl MemoryMonitor {
    pub fn new(config: MemoryConfig, sampler: Box<dyn MemorySampler>) -> Self {
        tracing::debug!(sampler = %sampler.kind(), "memory monitor created");
        Self {
            samples: VecDeque::with_capacity(config.sample_window),
            config,
            sampler,
            level: PressureLevel::Low,
            grants: VecDeque::new(),
            collections: 0,
            leak_rate: None,
            snapshot: MemorySnapshot::default(),
        }
    }

    pub fn sampler_kind(&self) -> SamplerKind {
        self.sampler.kind()
    }

    pub fn level(&self) -> PressureLevel {
        self.level
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Hub-held bytes over the heap budget.
    pub fn heap_ratio(&self, heap_used: u64) -> f64 {
        if self.config.heap_budget_bytes == 0 {
            0.0
        } else {
            heap_used as f64 / self.config.heap_budget_bytes as f64
        }
    }

    /// Sample process memory and classify pressure.
    ///
    /// `heap_used` is the hub's own estimate of envelope bytes it holds.
    pub fn check_pressure(&mut self, heap_used: u64, now: Instant) -> PressureReading {
        let heap_ratio = self.heap_ratio(heap_used);
        let reading = self.sampler.sample();
        let resident_ratio = reading.map(|r| r.ratio()).unwrap_or(0.0);
        let level = classify(heap_ratio, resident_ratio, self.config.warning_ratio, self.config.critical_ratio);

        let tracked = reading.map(|r| r.resident_bytes).unwrap_or(heap_used);
        if self.samples.len() >= self.config.sample_window.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back((now, tracked));

        let previous = (level != self.level).then_some(self.level);
        self.level = level;
        self.snapshot = MemorySnapshot {
            level,
            heap_ratio,
            resident_ratio,
            heap_used_bytes: heap_used,
            resident_bytes: reading.map(|r| r.resident_bytes).unwrap_or(0),
            collections: self.collections,
            leak_rate_bytes_per_min: self.leak_rate,
            sampled_at: Some(Utc::now()),
        };

        PressureReading {
            level,
            previous,
            heap_ratio,
            resident_ratio,
        }
    }

    /// Ask for a collection, subject to cooldown and the per-window cap.
    ///
    /// Never fails; callers act only on [`CollectionDecision::Granted`].
    pub fn request_collection(&mut self, reason: &str, now: Instant) -> CollectionDecision {
        if !self.config.collection_enabled {
            tracing::warn!(reason, level = %self.level, "memory collection disabled, alerting only");
            return CollectionDecision::AlertOnly;
        }

        let window = self.config.collection_window();
        while let Some(&oldest) = self.grants.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.grants.pop_front();
            } else {
                break;
            }
        }

        if let Some(&last) = self.grants.back() {
            let since = now.saturating_duration_since(last);
            let cooldown = self.config.collection_cooldown();
            if since < cooldown {
                return CollectionDecision::CoolingDown {
                    remaining: cooldown - since,
                };
            }
        }

        if self.grants.len() >= self.config.max_collections_per_window as usize {
            tracing::debug!(reason, "collection cap reached for this window");
            return CollectionDecision::Exhausted;
        }

        self.grants.push_back(now);
        self.collections += 1;
        self.snapshot.collections = self.collections;
        tracing::info!(reason, collections = self.collections, "memory collection granted");
        CollectionDecision::Granted
    }

    /// Inspect the sample window for sustained growth.
    ///
    /// Requires a full window, a least-squares slope above the configured
    /// rate, net growth, and at least three quarters of consecutive samples
    /// rising. Returns the growth rate in bytes per minute.
    pub fn detect_leak_trend(&mut self) -> Option<f64> {
        self.leak_rate = self.leak_rate_estimate();
        self.snapshot.leak_rate_bytes_per_min = self.leak_rate;
        if let Some(rate) = self.leak_rate {
            tracing::warn!(rate_bytes_per_min = rate, "sustained memory growth, possible leak");
        }
        self.leak_rate
    }

    fn leak_rate_estimate(&self) -> Option<f64> {
        let window = self.config.sample_window;
        if window < 3 || self.samples.len() < window {
            return None;
        }
        let (t0, first) = *self.samples.front()?;
        let (_, last) = *self.samples.back()?;
        if last <= first {
            return None;
        }

        let rising = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .filter(|((_, a), (_, b))| b > a)
            .count();
        if (rising as f64) < 0.75 * (self.samples.len() - 1) as f64 {
            return None;
        }

        let points: Vec<(f64, f64)> = self
            .samples
            .iter()
            .map(|(at, bytes)| (at.saturating_duration_since(t0).as_secs_f64(), *bytes as f64))
            .collect();
        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
        let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), (x, y)| {
            (num + (x - mean_x) * (y - mean_y), den + (x - mean_x).powi(2))
        });
        if den == 0.0 {
            return None;
        }

        let rate = num / den * 60.0;
        (rate > self.config.leak_rate_bytes_per_min as f64).then_some(rate)
    }

    pub fn collections(&self) -> u64 {
        self.collections
    }

    /// The most recent reading.
    pub fn snapshot(&self) -> MemorySnapshot {
        self.snapshot.clone()
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("sampler", &self.sampler.kind())
            .field("level", &self.level)
            .field("samples", &self.samples.len())
            .field("collections", &self.collections)
            .finish()
    }
}

/// Map the two ratios to a pressure level.
///
/// Either ratio past `warning` is moderate, past `critical` is high. Both past
/// `critical`, or either exhausted, is critical.
fn classify(heap: f64, resident: f64, warning: f64, critical: f64) -> PressureLevel {
    let worst = heap.max(resident);
    if worst >= 1.0 || (heap >= critical && resident >= critical) {
        PressureLevel::Critical
    } else if worst >= critical {
        PressureLevel::High
    } else if worst >= warning {
        PressureLevel::Moderate
    } else {
        PressureLevel::Low
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
