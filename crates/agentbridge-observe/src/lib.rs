//! Observability for agentbridge: tracing subscriber and OpenTelemetry export.

pub mod tracing_setup;
