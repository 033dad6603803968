use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::family::model::{AllowedDevice, DeviceId, FamilyId, validate_id};
use crate::utils::{GatewayError, Result};

/// Per-family device allow-lists.
///
/// A device id is owned by at most one family at a time; `owners` is the
/// reverse index that enforces it.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    allow_lists: HashMap<FamilyId, BTreeMap<DeviceId, AllowedDevice>>,
    owners: HashMap<DeviceId, FamilyId>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a device to a family. Re-adding to the same family refreshes
    /// the display name and kind but keeps the first registration time.
    pub fn add(&mut self, family_id: &str, device: AllowedDevice) -> Result<AllowedDevice> {
        validate_id("device", &device.device_id)?;
        if let Some(owner) = self.owners.get(&device.device_id) {
            if owner != family_id {
                return Err(GatewayError::DeviceOwnedElsewhere {
                    device_id: device.device_id.clone(),
                    family_id: owner.clone(),
                });
            }
        }

        let list = self.allow_lists.entry(family_id.to_string()).or_default();
        let stored = match list.get_mut(&device.device_id) {
            Some(existing) => {
                existing.display_name = device.display_name;
                existing.kind = device.kind;
                existing.clone()
            }
            None => {
                info!("Device {} admitted to family {family_id}", device.device_id);
                list.insert(device.device_id.clone(), device.clone());
                device
            }
        };
        self.owners
            .insert(stored.device_id.clone(), family_id.to_string());
        Ok(stored)
    }

    pub fn remove(&mut self, family_id: &str, device_id: &str) -> Result<AllowedDevice> {
        let removed = self
            .allow_lists
            .get_mut(family_id)
            .and_then(|list| list.remove(device_id))
            .ok_or_else(|| GatewayError::DeviceNotAllowed {
                family_id: family_id.to_string(),
                device_id: device_id.to_string(),
            })?;
        self.owners.remove(device_id);
        info!("Device {device_id} removed from family {family_id}");
        Ok(removed)
    }

    pub fn is_allowed(&self, family_id: &str, device_id: &str) -> bool {
        self.allow_lists
            .get(family_id)
            .is_some_and(|list| list.contains_key(device_id))
    }

    pub fn owner(&self, device_id: &str) -> Option<&FamilyId> {
        self.owners.get(device_id)
    }

    pub fn devices(&self, family_id: &str) -> Vec<AllowedDevice> {
        self.allow_lists
            .get(family_id)
            .map(|list| list.values().cloned().collect())
            .unwrap_or_default()
    }
}
