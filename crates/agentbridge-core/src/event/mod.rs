//! Observer bus for hub events.
//!
//! Subscribers (metrics, logging) receive [`HubEvent`]s over a
//! `tokio::sync::broadcast` channel. Routing never waits on them.
//!
//! [`HubEvent`]: agentbridge_types::event::HubEvent

pub mod bus;

pub use bus::EventBus;
