use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::family::{DeviceId, DeviceRegistry, FamilyId};
use crate::presence::state::{PresenceEvent, PresenceState};

/// Cached presence for one device.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DevicePresence {
    pub device_id: DeviceId,
    pub family_id: FamilyId,
    pub state: PresenceState,
    pub last_seen: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Transition {
    pub device_id: DeviceId,
    pub family_id: FamilyId,
    pub from: PresenceState,
    pub to: PresenceState,
}

/// In-memory presence cache. Reads never leave the process; the only
/// writers are messages routed through the broker adapter and the explicit
/// eviction/heartbeat paths.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    devices: HashMap<DeviceId, DevicePresence>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event on behalf of `family_id`. Devices that are not on
    /// the family's allow-list never transition; `None` is returned and
    /// the event is dropped.
    pub fn apply(
        &mut self,
        registry: &DeviceRegistry,
        family_id: &str,
        device_id: &str,
        event: PresenceEvent,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        if !registry.is_allowed(family_id, device_id) {
            warn!("Presence event {event:?} from {device_id} not admitted to family {family_id}");
            return None;
        }

        let entry = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| DevicePresence {
                device_id: device_id.to_string(),
                family_id: family_id.to_string(),
                state: PresenceState::Unknown,
                last_seen: now,
                changed_at: now,
            });
        entry.family_id = family_id.to_string();
        entry.last_seen = now;

        let from = entry.state;
        let Some(to) = from.on(event) else {
            debug!("Presence event {event:?} leaves {device_id} in {from:?}");
            return None;
        };
        entry.state = to;
        entry.changed_at = now;
        info!("Device {device_id} of family {family_id}: {from:?} -> {to:?}");

        Some(Transition {
            device_id: device_id.to_string(),
            family_id: family_id.to_string(),
            from,
            to,
        })
    }

    /// Record activity without changing state.
    pub fn touch(&mut self, device_id: &str, now: DateTime<Utc>) {
        if let Some(entry) = self.devices.get_mut(device_id) {
            entry.last_seen = now;
        }
    }

    /// Mark the device disconnected after eviction. Unlike `apply` this
    /// does not consult the registry, since the device has just left it.
    pub fn evict(&mut self, device_id: &str, now: DateTime<Utc>) -> Option<Transition> {
        let entry = self.devices.get_mut(device_id)?;
        let from = entry.state;
        let to = from.on(PresenceEvent::ForcedDisconnect)?;
        entry.state = to;
        entry.changed_at = now;
        info!("Device {device_id} evicted: {from:?} -> {to:?}");
        Some(Transition {
            device_id: device_id.to_string(),
            family_id: entry.family_id.clone(),
            from,
            to,
        })
    }

    /// Drop the cached entry so the device reads as `Unknown` again.
    pub fn forget(&mut self, device_id: &str) {
        self.devices.remove(device_id);
    }

    /// Move live devices that have been silent longer than `window` to
    /// `Disconnected`.
    pub fn expire_stale(&mut self, now: DateTime<Utc>, window: Duration) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for entry in self.devices.values_mut() {
            if !entry.state.is_live() || now - entry.last_seen <= window {
                continue;
            }
            if let Some(to) = entry.state.on(PresenceEvent::HeartbeatExpired) {
                warn!(
                    "Device {} timed out (last seen {}s ago)",
                    entry.device_id,
                    (now - entry.last_seen).num_seconds()
                );
                transitions.push(Transition {
                    device_id: entry.device_id.clone(),
                    family_id: entry.family_id.clone(),
                    from: entry.state,
                    to,
                });
                entry.state = to;
                entry.changed_at = now;
            }
        }
        transitions
    }

    pub fn state(&self, device_id: &str) -> PresenceState {
        self.devices
            .get(device_id)
            .map(|p| p.state)
            .unwrap_or_default()
    }

    pub fn get(&self, device_id: &str) -> Option<&DevicePresence> {
        self.devices.get(device_id)
    }

    /// Devices of `family_id` currently in `Connected`, ordered by id.
    pub fn connected(&self, family_id: &str) -> Vec<DevicePresence> {
        let mut list: Vec<DevicePresence> = self
            .devices
            .values()
            .filter(|p| p.family_id == family_id && p.state == PresenceState::Connected)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        list
    }
}
