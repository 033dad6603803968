//! The family-scoped messaging gateway.
//!
//! - `engine`: `Gateway`, the management surface and background loops
//! - `inbound`: decoding, authorization and routing of broker publishes
//! - `events`: what watchers of the gateway are told
//! - `stats`: drop and outcome counters

pub mod engine;
pub mod events;
mod inbound;
pub mod stats;

pub use engine::Gateway;
pub use events::GatewayEvent;
pub use stats::{GatewayStats, StatsSnapshot};
