//! Bridge core for agentbridge.
//!
//! Everything that decides where an envelope goes lives here. The crate
//! depends only on `agentbridge-types`; OS-facing pieces (process memory
//! sampling, config files) are injected from `agentbridge-infra`.
//!
//! Leaf-first:
//! - `pool` -- generic object pool with idle eviction and shrinking
//! - `memory` -- memory pressure monitor and the sampler port
//! - `offload` -- worker offload pool for CPU-heavy payload transforms
//! - `history` -- fixed-capacity circular log of accepted envelopes
//! - `registry` -- connected clients and their outbound handles
//! - `queue` -- per-recipient offline FIFO queues
//! - `envelope` -- enrichment of raw messages into envelopes
//! - `router` -- the control plane tying all of the above together
//! - `hub` -- the single-writer loop that owns the router, and its handle
//! - `event` -- observer bus for metrics and logging

pub mod envelope;
pub mod event;
pub mod history;
pub mod hub;
pub mod memory;
pub mod offload;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod router;

pub use event::EventBus;
pub use hub::{Hub, HubHandle};
pub use router::Router;
