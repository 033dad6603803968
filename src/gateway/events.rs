use serde::Serialize;

use crate::correlation::{ExchangeOutcome, QuestionId};
use crate::family::{DeviceId, FamilyId};
use crate::presence::{PresenceState, Transition};

/// Broadcast to everyone watching the gateway.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    PresenceChanged {
        family_id: FamilyId,
        device_id: DeviceId,
        from: PresenceState,
        to: PresenceState,
    },
    ExchangeSettled {
        question_id: QuestionId,
        family_id: FamilyId,
        outcome: ExchangeOutcome,
    },
    QuestionRequested {
        family_id: FamilyId,
        device_id: DeviceId,
    },
    Notification {
        family_id: FamilyId,
        device_id: DeviceId,
        content: String,
    },
    CredentialsRotated {
        family_id: FamilyId,
    },
    DeviceEvicted {
        family_id: FamilyId,
        device_id: DeviceId,
    },
}

impl From<Transition> for GatewayEvent {
    fn from(t: Transition) -> Self {
        GatewayEvent::PresenceChanged {
            family_id: t.family_id,
            device_id: t.device_id,
            from: t.from,
            to: t.to,
        }
    }
}
