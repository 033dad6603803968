//! Family-scoped identity, device admission and authorization.
//!
//! - `acl`: credential issuance, rotation and the prefix/username indexes.
//! - `registry`: per-family device allow-lists.
//! - `model`: the records shared with the persistence collaborator.
//!
//! `FamilyDirectory` bundles both tables with the session table so that
//! the gateway can mutate them under a single lock. Authorization decisions
//! are made here.

pub mod acl;
pub mod model;
pub mod registry;

use tracing::warn;

use crate::client::SessionTable;
use crate::utils::Result;

pub use acl::{CredentialManager, FamilyAccess, Rotation};
pub use model::{
    AllowedDevice, Credentials, DeviceId, DeviceKind, FamilyConfig, FamilyId, FamilyLookup,
    FamilyRecord, validate_id,
};
pub use registry::DeviceRegistry;

/// Who published an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publisher {
    /// The gateway's own backend identity.
    Backend,
    Device(DeviceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    UnknownFamily,
    FamilyDisabled,
    NoCredentials,
    ForeignTopic,
    DeviceNotListed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug)]
pub struct FamilyDirectory {
    pub acl: CredentialManager,
    pub registry: DeviceRegistry,
    pub sessions: SessionTable,
}

impl FamilyDirectory {
    pub fn new(topic_root: &str) -> Self {
        Self {
            acl: CredentialManager::new(topic_root),
            registry: DeviceRegistry::new(),
            sessions: SessionTable::new(),
        }
    }

    /// Load a persisted family into both tables. Devices already owned by
    /// another family are skipped with a warning.
    pub fn load(&mut self, record: &FamilyRecord) -> Result<()> {
        self.acl.load(record)?;
        for device in &record.allowed_devices {
            if let Err(e) = self.registry.add(&record.family_id, device.clone()) {
                warn!(
                    "Skipping device {} while loading family {}: {e}",
                    device.device_id, record.family_id
                );
            }
        }
        Ok(())
    }

    pub fn contains(&self, family_id: &str) -> bool {
        self.acl.contains(family_id)
    }

    /// Snapshot of a family in its persisted shape.
    pub fn record(&self, family_id: &str) -> Option<FamilyRecord> {
        let access = self.acl.access(family_id)?;
        Some(FamilyRecord {
            family_id: family_id.to_string(),
            enabled: access.enabled,
            credentials: access.credentials.clone(),
            allowed_devices: self.registry.devices(family_id),
            last_connection: access.last_connection,
        })
    }

    pub fn config(&self, family_id: &str) -> Option<FamilyConfig> {
        self.record(family_id).map(|r| FamilyConfig::from(&r))
    }

    /// Allow requires an enabled family with credentials, a topic under the
    /// family's prefix, and a publisher that is either the backend or a
    /// device on the family's allow-list.
    pub fn authorize(&self, publisher: &Publisher, family_id: &str, topic: &str) -> Decision {
        let Some(access) = self.acl.access(family_id) else {
            return Decision::Deny(DenyReason::UnknownFamily);
        };
        if !access.enabled {
            return Decision::Deny(DenyReason::FamilyDisabled);
        }
        let Some(creds) = access.credentials.as_ref() else {
            return Decision::Deny(DenyReason::NoCredentials);
        };

        let under_prefix = topic
            .strip_prefix(creds.topic_prefix.as_str())
            .is_some_and(|rest| rest.starts_with('/'));
        if !under_prefix {
            return Decision::Deny(DenyReason::ForeignTopic);
        }

        match publisher {
            Publisher::Backend => Decision::Allow,
            Publisher::Device(device_id) if self.registry.is_allowed(family_id, device_id) => {
                Decision::Allow
            }
            Publisher::Device(_) => Decision::Deny(DenyReason::DeviceNotListed),
        }
    }
}
