//! Infrastructure layer for agentbridge.
//!
//! Contains the OS-facing adapters injected into `agentbridge-core`: the
//! TOML configuration loader and the `sysinfo`-backed process memory sampler.

pub mod config;
pub mod memory;
