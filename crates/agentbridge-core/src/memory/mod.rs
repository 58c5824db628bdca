//! Memory pressure monitoring.
//!
//! [`MemoryMonitor`] classifies pressure from two ratios: hub-held envelope
//! bytes over the configured heap budget, and process RSS over total system
//! memory. The process reading comes through the [`MemorySampler`] port so the
//! core stays free of OS dependencies; `agentbridge-infra` provides the
//! production sampler.

pub mod monitor;
pub mod sampler;

pub use monitor::{CollectionDecision, MemoryMonitor, PressureReading};
pub use sampler::{FixedSampler, MemoryReading, MemorySampler, NullSampler, SamplerKind};
