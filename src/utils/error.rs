//! Error type shared by every gateway component.
//!
//! Caller-facing operations (management surface, dispatch) return these.
//! Faults on the inbound path are logged and counted instead; they never
//! travel back to the network peer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("family not found: {0}")]
    FamilyNotFound(String),

    #[error("messaging is not enabled for family {0}")]
    FamilyNotEnabled(String),

    #[error("device {device_id} is not on the allow-list of family {family_id}")]
    DeviceNotAllowed {
        family_id: String,
        device_id: String,
    },

    #[error("device {device_id} already belongs to family {family_id}")]
    DeviceOwnedElsewhere {
        device_id: String,
        family_id: String,
    },

    #[error("conflicting family data: {0}")]
    Conflict(String),

    #[error("invalid broker credentials")]
    InvalidCredentials,

    #[error("broker connection is unavailable")]
    BrokerUnavailable,

    #[error("gateway is shutting down")]
    ShuttingDown,

    #[error("invalid {kind} id '{id}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("malformed message on '{topic}': {reason}")]
    Malformed { topic: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl GatewayError {
    pub fn malformed(topic: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }
}
