//! Maps control requests onto the gateway's management surface.

use tokio::sync::broadcast;

use crate::correlation::{ExchangeHandle, timeout_from_secs};
use crate::family::Credentials;
use crate::gateway::{Gateway, GatewayEvent};
use crate::transport::message::{ControlRequest, ControlResponse};
use crate::utils::GatewayError;

/// Work that continues on the connection after the immediate response.
pub enum Followup {
    /// Push the outcome when the exchange settles.
    Outcome(ExchangeHandle),
    /// Stream gateway events until the peer goes away.
    Events(broadcast::Receiver<GatewayEvent>),
}

fn credentials(creds: Credentials) -> ControlResponse {
    ControlResponse::Credentials {
        username: creds.username,
        password: creds.password,
        topic_prefix: creds.topic_prefix,
    }
}

fn error(e: GatewayError) -> ControlResponse {
    ControlResponse::Error {
        message: e.to_string(),
    }
}

pub fn handle_request(
    gateway: &Gateway,
    request: ControlRequest,
) -> (ControlResponse, Option<Followup>) {
    let response = match request {
        ControlRequest::EnableFamily { family_id, enabled } => gateway
            .enable_messaging(&family_id, enabled)
            .map(|config| ControlResponse::Family { config }),
        ControlRequest::IssueCredentials { family_id } => {
            gateway.issue_credentials(&family_id).map(credentials)
        }
        ControlRequest::RotateCredentials { family_id } => {
            gateway.rotate_credentials(&family_id).map(credentials)
        }
        ControlRequest::Authenticate {
            client_id,
            username,
            password,
        } => gateway
            .authenticate(&client_id, &username, &password)
            .map(|family_id| ControlResponse::Authenticated { family_id }),
        ControlRequest::AddDevice {
            family_id,
            device_id,
            display_name,
            kind,
        } => gateway
            .add_device(&family_id, &device_id, &display_name, kind)
            .map(|config| ControlResponse::Family { config }),
        ControlRequest::RemoveDevice {
            family_id,
            device_id,
        } => gateway
            .remove_device(&family_id, &device_id)
            .map(|config| ControlResponse::Family { config }),
        ControlRequest::ListConnected { family_id } => Ok(ControlResponse::Connected {
            devices: gateway.connected_devices(&family_id),
            family_id,
        }),
        ControlRequest::Dispatch {
            family_id,
            content,
            target,
            timeout_secs,
        } => {
            let timeout = match timeout_secs.map(timeout_from_secs).transpose() {
                Ok(timeout) => timeout,
                Err(e) => return (error(e), None),
            };
            return match gateway.dispatch_question(&family_id, &content, target, timeout) {
                Ok(handle) => (
                    ControlResponse::Dispatched {
                        question_id: handle.question_id.clone(),
                    },
                    Some(Followup::Outcome(handle)),
                ),
                Err(e) => (error(e), None),
            };
        }
        ControlRequest::SendMessage {
            family_id,
            target,
            message_type,
            content,
        } => gateway
            .send_message(&family_id, target, &message_type, &content)
            .map(|()| ControlResponse::Sent),
        ControlRequest::Cancel { question_id } => Ok(ControlResponse::Cancelled {
            cancelled: gateway.cancel(&question_id),
            question_id,
        }),
        ControlRequest::Stats => Ok(ControlResponse::Stats {
            stats: gateway.stats(),
        }),
        ControlRequest::Watch => {
            return (
                ControlResponse::Watching,
                Some(Followup::Events(gateway.subscribe_events())),
            );
        }
    };

    (response.unwrap_or_else(error), None)
}
