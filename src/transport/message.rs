use serde::{Deserialize, Serialize};

use crate::correlation::{ExchangeOutcome, QuestionId};
use crate::family::{DeviceId, DeviceKind, FamilyConfig, FamilyId};
use crate::gateway::{GatewayEvent, StatsSnapshot};
use crate::presence::DevicePresence;

fn default_true() -> bool {
    true
}

fn default_message_type() -> String {
    "notification".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    EnableFamily {
        family_id: FamilyId,
        #[serde(default = "default_true")]
        enabled: bool,
    },
    IssueCredentials {
        family_id: FamilyId,
    },
    RotateCredentials {
        family_id: FamilyId,
    },
    Authenticate {
        client_id: String,
        username: String,
        password: String,
    },
    AddDevice {
        family_id: FamilyId,
        device_id: DeviceId,
        display_name: String,
        #[serde(default)]
        kind: DeviceKind,
    },
    RemoveDevice {
        family_id: FamilyId,
        device_id: DeviceId,
    },
    ListConnected {
        family_id: FamilyId,
    },
    Dispatch {
        family_id: FamilyId,
        content: String,
        target: Option<DeviceId>,
        timeout_secs: Option<u64>,
    },
    SendMessage {
        family_id: FamilyId,
        target: Option<DeviceId>,
        #[serde(default = "default_message_type")]
        message_type: String,
        content: String,
    },
    Cancel {
        question_id: QuestionId,
    },
    Stats,
    Watch,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Family {
        config: FamilyConfig,
    },
    Credentials {
        username: String,
        password: String,
        topic_prefix: String,
    },
    Authenticated {
        family_id: FamilyId,
    },
    Connected {
        family_id: FamilyId,
        devices: Vec<DevicePresence>,
    },
    Dispatched {
        question_id: QuestionId,
    },
    Outcome {
        question_id: QuestionId,
        outcome: ExchangeOutcome,
    },
    Sent,
    Cancelled {
        question_id: QuestionId,
        cancelled: bool,
    },
    Stats {
        stats: StatsSnapshot,
    },
    Watching,
    Event {
        event: GatewayEvent,
    },
    Error {
        message: String,
    },
}
