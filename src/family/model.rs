//! Family and device records as stored by the persistence collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{GatewayError, Result};

pub type FamilyId = String;
pub type DeviceId = String;

/// Ids end up as single topic segments.
pub fn validate_id(kind: &'static str, id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        "must not be empty"
    } else if id.contains('/') {
        "must not contain '/'"
    } else if id.contains(['+', '#']) {
        "must not contain MQTT wildcards"
    } else {
        return Ok(());
    };
    Err(GatewayError::InvalidIdentifier {
        kind,
        id: id.to_string(),
        reason: reason.to_string(),
    })
}

/// Broker identity issued to a family.
///
/// The password never shows up in `Debug` output.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub topic_prefix: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("topic_prefix", &self.topic_prefix)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Embedded,
    Mobile,
    Script,
    #[default]
    #[serde(other)]
    Unknown,
}

/// An entry on a family's allow-list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowedDevice {
    pub device_id: DeviceId,
    pub display_name: String,
    #[serde(default)]
    pub kind: DeviceKind,
    pub registered_at: DateTime<Utc>,
}

/// Everything the gateway persists about one family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FamilyRecord {
    pub family_id: FamilyId,
    pub enabled: bool,
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub allowed_devices: Vec<AllowedDevice>,
    pub last_connection: Option<DateTime<Utc>>,
}

impl FamilyRecord {
    pub fn new(family_id: &str) -> Self {
        Self {
            family_id: family_id.to_string(),
            enabled: false,
            credentials: None,
            allowed_devices: Vec::new(),
            last_connection: None,
        }
    }
}

/// Result of reading a family from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyLookup {
    Enabled(FamilyRecord),
    NotEnabled,
}

/// What the management surface hands back after a configuration change.
/// Carries no password.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FamilyConfig {
    pub family_id: FamilyId,
    pub enabled: bool,
    pub username: Option<String>,
    pub topic_prefix: Option<String>,
    pub allowed_devices: Vec<AllowedDevice>,
    pub last_connection: Option<DateTime<Utc>>,
}

impl From<&FamilyRecord> for FamilyConfig {
    fn from(record: &FamilyRecord) -> Self {
        Self {
            family_id: record.family_id.clone(),
            enabled: record.enabled,
            username: record.credentials.as_ref().map(|c| c.username.clone()),
            topic_prefix: record.credentials.as_ref().map(|c| c.topic_prefix.clone()),
            allowed_devices: record.allowed_devices.clone(),
            last_connection: record.last_connection,
        }
    }
}
