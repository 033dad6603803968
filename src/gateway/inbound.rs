//! Inbound dispatch path
//!
//! Every publish the adapter forwards goes through `handle_inbound`:
//! parse the topic, decode the payload, authorize the publisher, then hand
//! the message to presence or correlation. Nothing here returns an error to
//! the peer; drops are logged with topic and reason and counted.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::broker::message::RawMessage;
use crate::broker::topic::Route;
use crate::correlation::{Answer, ExchangeOutcome, Resolution};
use crate::family::{Decision, FamilyDirectory, Publisher};
use crate::gateway::Gateway;
use crate::gateway::events::GatewayEvent;
use crate::gateway::stats::Counter;
use crate::persistence::AnswerRecord;
use crate::presence::PresenceEvent;
use crate::utils::{GatewayError, Result};

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: String,
    device_id: String,
    family_id: String,
    #[allow(dead_code)]
    timestamp: f64,
}

#[derive(Debug, Deserialize)]
struct AnswerPayload {
    question_id: String,
    answer: String,
    device_id: String,
    #[allow(dead_code)]
    timestamp: f64,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    content: String,
    device_id: String,
    #[allow(dead_code)]
    timestamp: f64,
}

#[derive(Debug, Deserialize)]
struct RequestPayload {
    #[serde(rename = "type")]
    kind: String,
    device_id: String,
    #[allow(dead_code)]
    timestamp: f64,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct QuestionPayload {
    question_id: String,
    content: String,
    timestamp: f64,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct DirectedPayload {
    #[serde(rename = "type")]
    kind: String,
    content: String,
    timestamp: f64,
}

fn decode<T: DeserializeOwned>(raw: &RawMessage) -> Result<T> {
    serde_json::from_slice(&raw.payload)
        .map_err(|e| GatewayError::malformed(&raw.topic, e.to_string()))
}

impl Gateway {
    pub fn handle_inbound(&self, raw: RawMessage) {
        self.handle_inbound_at(raw, Utc::now());
    }

    pub fn handle_inbound_at(&self, raw: RawMessage, now: DateTime<Utc>) {
        // Empty retained payloads are topic clears, including our own.
        if raw.payload.is_empty() {
            debug!("Ignoring empty payload on {}", raw.topic);
            return;
        }
        let Some(parsed) = self.layout.parse(&raw.topic) else {
            self.drop_malformed(GatewayError::malformed(&raw.topic, "unrecognised topic"));
            return;
        };

        let result = match &parsed.route {
            Route::ClientStatus { device_id } => self.on_status(&raw, device_id, now),
            Route::Answers { family_id } => self.on_answer(&raw, family_id, now),
            Route::Notifications { family_id } => self.on_notification(&raw, family_id, now),
            Route::Request { family_id } => self.on_request(&raw, family_id, now),
            Route::Questions { .. } => decode::<QuestionPayload>(&raw).map(|_| ()),
            Route::DeviceDirected { .. } => decode::<DirectedPayload>(&raw).map(|_| ()),
        };

        if let Err(e) = result {
            match e {
                GatewayError::Malformed { .. } => self.drop_malformed(e),
                other => warn!("Inbound message on {} not processed: {other}", raw.topic),
            }
        } else if matches!(
            parsed.route,
            Route::Questions { .. } | Route::DeviceDirected { .. }
        ) {
            debug!("Outbound route {} seen inbound, ignored", raw.topic);
        }
    }

    fn drop_malformed(&self, error: GatewayError) {
        self.stats.bump(Counter::MalformedDrops);
        warn!("Dropped message: {error}");
    }

    /// Returns true if the publisher may use `topic` for `family_id`;
    /// otherwise counts and logs the drop.
    fn admit(
        &self,
        directory: &FamilyDirectory,
        publisher: &Publisher,
        family_id: &str,
        topic: &str,
    ) -> bool {
        match directory.authorize(publisher, family_id, topic) {
            Decision::Allow => true,
            Decision::Deny(reason) => {
                self.stats.bump(Counter::UnauthorizedDrops);
                warn!(
                    "Dropped message on {topic} from {publisher:?} for family {family_id}: {reason:?}"
                );
                false
            }
        }
    }

    fn publisher(&self, device_id: &str) -> Publisher {
        if device_id == self.settings.backend_identity {
            Publisher::Backend
        } else {
            Publisher::Device(device_id.to_string())
        }
    }

    /// Answers and requests only ever come from devices. The gateway never
    /// publishes either, so one carrying the backend identity is spoofed.
    fn device_only(&self, publisher: &Publisher, family_id: &str, topic: &str) -> bool {
        if *publisher != Publisher::Backend {
            return true;
        }
        self.stats.bump(Counter::UnauthorizedDrops);
        warn!(
            "Dropped message on {topic} for family {family_id}: backend identity used by a client"
        );
        false
    }

    /// Load the family if needed. An unknown family is an authorization
    /// failure, not a fault.
    fn known_family(&self, family_id: &str, topic: &str) -> Result<bool> {
        if self.ensure_loaded(family_id)? {
            return Ok(true);
        }
        self.stats.bump(Counter::UnauthorizedDrops);
        warn!("Dropped message on {topic}: unknown family {family_id}");
        Ok(false)
    }

    fn on_status(&self, raw: &RawMessage, topic_device: &str, now: DateTime<Utc>) -> Result<()> {
        let payload: StatusPayload = decode(raw)?;
        let event = match payload.status.as_str() {
            "connected" => PresenceEvent::StatusConnected,
            "disconnected" => PresenceEvent::StatusDisconnected,
            other => {
                return Err(GatewayError::malformed(
                    &raw.topic,
                    format!("unknown status '{other}'"),
                ));
            }
        };
        if payload.device_id != topic_device {
            self.stats.bump(Counter::UnauthorizedDrops);
            warn!(
                "Dropped status on {}: payload claims device {}",
                raw.topic, payload.device_id
            );
            return Ok(());
        }
        let family_id = payload.family_id.as_str();
        if !self.known_family(family_id, &raw.topic)? {
            return Ok(());
        }

        let transition = {
            let directory = self.directory();
            let publisher = Publisher::Device(topic_device.to_string());
            if !self.admit(&directory, &publisher, family_id, &raw.topic) {
                return Ok(());
            }
            self.presence_mut()
                .apply(&directory.registry, family_id, topic_device, event, now)
        };
        if let Some(transition) = transition {
            self.emit(transition.into());
        }

        if event == PresenceEvent::StatusConnected {
            let mut directory = self.directory_mut();
            directory.acl.record_connection(family_id, now);
            // Failures are counted inside; presence already moved.
            let _ = self.persist(&directory, family_id);
        }
        Ok(())
    }

    fn on_answer(&self, raw: &RawMessage, family_id: &str, now: DateTime<Utc>) -> Result<()> {
        let payload: AnswerPayload = decode(raw)?;
        if !self.known_family(family_id, &raw.topic)? {
            return Ok(());
        }
        let publisher = self.publisher(&payload.device_id);
        if !self.device_only(&publisher, family_id, &raw.topic) {
            return Ok(());
        }

        let resolution = {
            let directory = self.directory();
            if !self.admit(&directory, &publisher, family_id, &raw.topic) {
                return Ok(());
            }
            self.presence_mut().touch(&payload.device_id, now);
            self.exchanges_mut().resolve(
                Answer {
                    question_id: payload.question_id.clone(),
                    family_id: family_id.to_string(),
                    device_id: payload.device_id.clone(),
                    answer: payload.answer,
                    answered_at: now,
                },
                now,
            )
        };

        match resolution {
            Resolution::Resolved(answer) => {
                self.stats.bump(Counter::AnswersResolved);
                match self.store.record_answer(&AnswerRecord::from_answer(&answer, now)) {
                    Ok(true) => {}
                    Ok(false) => warn!("Answer for {} was already stored", answer.question_id),
                    Err(e) => {
                        self.stats.bump(Counter::PersistenceFailures);
                        warn!("Failed to persist answer {}: {e}", answer.question_id);
                    }
                }
                self.emit(GatewayEvent::ExchangeSettled {
                    question_id: answer.question_id.clone(),
                    family_id: answer.family_id.clone(),
                    outcome: ExchangeOutcome::Answered { answer },
                });
            }
            Resolution::ExpiredOnArrival => {
                self.stats.bump(Counter::AnswersDiscarded);
                self.stats.bump(Counter::ExchangesExpired);
                self.emit(GatewayEvent::ExchangeSettled {
                    question_id: payload.question_id,
                    family_id: family_id.to_string(),
                    outcome: ExchangeOutcome::TimedOut,
                });
            }
            other => {
                self.stats.bump(Counter::AnswersDiscarded);
                info!(
                    "Discarded answer to {} from {}: {other:?}",
                    payload.question_id, payload.device_id
                );
            }
        }
        Ok(())
    }

    fn on_notification(&self, raw: &RawMessage, family_id: &str, now: DateTime<Utc>) -> Result<()> {
        let payload: NotificationPayload = decode(raw)?;
        if !self.known_family(family_id, &raw.topic)? {
            return Ok(());
        }
        let publisher = self.publisher(&payload.device_id);
        {
            let directory = self.directory();
            if !self.admit(&directory, &publisher, family_id, &raw.topic) {
                return Ok(());
            }
            self.presence_mut().touch(&payload.device_id, now);
        }

        if publisher == Publisher::Backend {
            debug!("Own notification echoed on {}", raw.topic);
            return Ok(());
        }
        self.emit(GatewayEvent::Notification {
            family_id: family_id.to_string(),
            device_id: payload.device_id,
            content: payload.content,
        });
        Ok(())
    }

    fn on_request(&self, raw: &RawMessage, family_id: &str, now: DateTime<Utc>) -> Result<()> {
        let payload: RequestPayload = decode(raw)?;
        if payload.kind != "question_request" {
            return Err(GatewayError::malformed(
                &raw.topic,
                format!("unsupported request type '{}'", payload.kind),
            ));
        }
        if !self.known_family(family_id, &raw.topic)? {
            return Ok(());
        }
        let publisher = self.publisher(&payload.device_id);
        if !self.device_only(&publisher, family_id, &raw.topic) {
            return Ok(());
        }
        {
            let directory = self.directory();
            if !self.admit(&directory, &publisher, family_id, &raw.topic) {
                return Ok(());
            }
            self.presence_mut().touch(&payload.device_id, now);
        }

        info!("Device {} requested a question for family {family_id}", payload.device_id);
        self.emit(GatewayEvent::QuestionRequested {
            family_id: family_id.to_string(),
            device_id: payload.device_id,
        });
        Ok(())
    }
}
