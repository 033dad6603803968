//! Device presence as a tagged state machine.
//!
//! `PresenceState::on` is pure: it only maps a state and an event to the
//! next state, or `None` when the event does not move the device. Gating
//! (is this device allowed to speak for this family?) happens before the
//! function is called.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    #[default]
    Unknown,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The broker accepted a connection for this device.
    SessionOpened,
    /// Retained `status=connected` message.
    StatusConnected,
    /// `status=disconnected`, usually the last-will.
    StatusDisconnected,
    /// Nothing heard within the heartbeat window.
    HeartbeatExpired,
    /// Eviction or credential rotation cut the session.
    ForcedDisconnect,
}

impl PresenceState {
    pub fn on(self, event: PresenceEvent) -> Option<PresenceState> {
        use PresenceEvent::*;
        use PresenceState::*;

        match (self, event) {
            (Unknown | Disconnected, SessionOpened) => Some(Connecting),
            (Unknown | Connecting | Disconnected, StatusConnected) => Some(Connected),
            (Connecting | Connected, StatusDisconnected) => Some(Disconnected),
            (Connecting | Connected, HeartbeatExpired) => Some(Disconnected),
            (Connecting | Connected, ForcedDisconnect) => Some(Disconnected),
            _ => None,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, PresenceState::Connecting | PresenceState::Connected)
    }
}
