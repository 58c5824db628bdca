//! Route handlers.

pub mod client;
pub mod envelope;
pub mod hub;
pub mod ws;
