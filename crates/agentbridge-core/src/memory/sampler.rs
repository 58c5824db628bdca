//! Process memory sampler port.

use std::collections::VecDeque;
use std::fmt;

/// What a sampler actually measures.
///
/// Carried explicitly so callers never have to guess whether they are
/// talking to the real process probe or a stand-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    /// Live readings of the current process.
    Process,
    /// Scripted readings, used in tests and benchmarks.
    Fixed,
    /// No process readings available on this platform.
    Unavailable,
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Process => "process",
            Self::Fixed => "fixed",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// One process memory reading, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub resident_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryReading {
    /// Resident set over total memory, 0 when the total is unknown.
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.resident_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Source of process memory readings.
pub trait MemorySampler: Send {
    fn kind(&self) -> SamplerKind;

    /// Take a reading. `None` when the platform cannot provide one right now.
    fn sample(&mut self) -> Option<MemoryReading>;
}

/// Replays a fixed script of readings, then repeats the last one.
#[derive(Debug, Default)]
pub struct FixedSampler {
    script: VecDeque<MemoryReading>,
    last: Option<MemoryReading>,
}

impl FixedSampler {
    pub fn new(readings: impl IntoIterator<Item = MemoryReading>) -> Self {
        Self {
            script: readings.into_iter().collect(),
            last: None,
        }
    }

    /// A sampler that always reports the same resident ratio.
    pub fn constant(resident_bytes: u64, total_bytes: u64) -> Self {
        Self::new([MemoryReading {
            resident_bytes,
            total_bytes,
        }])
    }
}

impl MemorySampler for FixedSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::Fixed
    }

    fn sample(&mut self) -> Option<MemoryReading> {
        if let Some(next) = self.script.pop_front() {
            self.last = Some(next);
        }
        self.last
    }
}

/// Sampler for platforms without process memory readings.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSampler;

impl MemorySampler for NullSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::Unavailable
    }

    fn sample(&mut self) -> Option<MemoryReading> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_sampler_repeats_last_reading() {
        let mut sampler = FixedSampler::new([
            MemoryReading { resident_bytes: 1, total_bytes: 10 },
            MemoryReading { resident_bytes: 2, total_bytes: 10 },
        ]);
        assert_eq!(sampler.sample().unwrap().resident_bytes, 1);
        assert_eq!(sampler.sample().unwrap().resident_bytes, 2);
        assert_eq!(sampler.sample().unwrap().resident_bytes, 2);
        assert_eq!(sampler.kind(), SamplerKind::Fixed);
    }

    #[test]
    fn reading_ratio_handles_unknown_total() {
        let reading = MemoryReading { resident_bytes: 5, total_bytes: 0 };
        assert_eq!(reading.ratio(), 0.0);
        assert!(NullSampler.sample().is_none());
    }
}
