//! Shared domain types for agentbridge.
//!
//! This crate contains the types exchanged between the hub core, the HTTP and
//! WebSocket surface, and the CLI: envelopes, client metadata, wire frames,
//! configuration, metric snapshots, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod metrics;
pub mod wire;
