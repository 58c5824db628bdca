//! Process memory sampling backed by `sysinfo`.

use agentbridge_core::memory::{MemoryReading, MemorySampler, NullSampler, SamplerKind};
use sysinfo::{Pid, ProcessExt, System, SystemExt};

/// Samples the resident set of the current process against total system memory.
pub struct SysinfoSampler {
    system: System,
    pid: Pid,
}

impl SysinfoSampler {
    /// `None` when the current pid cannot be determined on this platform.
    pub fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        Some(Self {
            system: System::new(),
            pid,
        })
    }
}

impl MemorySampler for SysinfoSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::Process
    }

    fn sample(&mut self) -> Option<MemoryReading> {
        self.system.refresh_memory();
        if !self.system.refresh_process(self.pid) {
            return None;
        }
        let resident_bytes = self.system.process(self.pid)?.memory();
        Some(MemoryReading {
            resident_bytes,
            total_bytes: self.system.total_memory(),
        })
    }
}

/// The best sampler this platform offers.
pub fn process_sampler() -> Box<dyn MemorySampler> {
    match SysinfoSampler::new() {
        Some(sampler) => Box::new(sampler),
        None => {
            tracing::warn!("process memory sampling unavailable, resident ratio will read 0");
            Box::new(NullSampler)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_sampler_reports_its_kind() {
        let sampler = process_sampler();
        assert!(matches!(sampler.kind(), SamplerKind::Process | SamplerKind::Unavailable));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn samples_current_process() {
        let mut sampler = SysinfoSampler::new().unwrap();
        let reading = sampler.sample().unwrap();
        assert!(reading.resident_bytes > 0);
        assert!(reading.total_bytes >= reading.resident_bytes);
        assert!(reading.ratio() > 0.0 && reading.ratio() <= 1.0);
    }
}
