//! Device presence derived from status messages.
//!
//! The state machine lives in `state` and is independent of the network;
//! `tracker` keeps the per-device cache that answers "who is connected"
//! synchronously.

pub mod state;
pub mod tracker;

pub use state::{PresenceEvent, PresenceState};
pub use tracker::{DevicePresence, PresenceTracker, Transition};
