//! Simulated device
//!
//! Connects to the broker with a family's credentials, keeps a retained
//! presence status (with a last-will for crashes), and answers every question
//! it receives with a canned reply. Used by `scribe-gateway device` to
//! exercise a running gateway end to end.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::broker::message::timestamp_secs;
use crate::broker::topic::{answers_topic, device_topic, questions_topic, status_topic};
use crate::family::{DeviceId, FamilyId};
use crate::utils::{GatewayError, Result};

#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub host: String,
    pub port: u16,
    pub family_id: FamilyId,
    pub device_id: DeviceId,
    pub username: String,
    pub password: String,
    pub prefix: String,
    pub reply: String,
    pub heartbeat: Duration,
}

/// What the device does with an incoming publish.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    Answer { topic: String, payload: Value },
    Evicted,
    Ignore,
}

pub fn status_payload(profile: &DeviceProfile, status: &str, now: DateTime<Utc>) -> Value {
    json!({
        "status": status,
        "device_id": profile.device_id,
        "family_id": profile.family_id,
        "timestamp": timestamp_secs(now),
    })
}

pub fn answer_payload(device_id: &str, question_id: &str, answer: &str, now: DateTime<Utc>) -> Value {
    json!({
        "question_id": question_id,
        "answer": answer,
        "device_id": device_id,
        "timestamp": timestamp_secs(now),
    })
}

pub fn react(profile: &DeviceProfile, topic: &str, payload: &[u8], now: DateTime<Utc>) -> Reaction {
    let Ok(body) = serde_json::from_slice::<Value>(payload) else {
        return Reaction::Ignore;
    };

    let control = device_topic(&profile.prefix, &profile.family_id, &profile.device_id, "control");
    if topic == control && body["type"] == "evict" {
        return Reaction::Evicted;
    }

    let Some(question_id) = body["question_id"].as_str() else {
        return Reaction::Ignore;
    };
    Reaction::Answer {
        topic: answers_topic(&profile.prefix, &profile.family_id),
        payload: answer_payload(&profile.device_id, question_id, &profile.reply, now),
    }
}

fn transport_error(e: rumqttc::ClientError) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

pub async fn run(profile: DeviceProfile) -> Result<()> {
    let status = status_topic(&profile.prefix, &profile.device_id);

    let mut options = MqttOptions::new(&profile.device_id, &profile.host, profile.port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_credentials(&profile.username, &profile.password);
    options.set_last_will(LastWill::new(
        status.as_str(),
        status_payload(&profile, "disconnected", Utc::now()).to_string(),
        QoS::AtLeastOnce,
        true,
    ));

    let (client, mut eventloop) = AsyncClient::new(options, 16);
    let mut heartbeat = tokio::time::interval(profile.heartbeat);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Stopping device {}", profile.device_id);
                client
                    .try_publish(
                        status.as_str(),
                        QoS::AtLeastOnce,
                        true,
                        status_payload(&profile, "disconnected", Utc::now()).to_string(),
                    )
                    .map_err(transport_error)?;
                break;
            }
            _ = heartbeat.tick() => {
                let payload = status_payload(&profile, "connected", Utc::now()).to_string();
                if let Err(e) = client.try_publish(status.as_str(), QoS::AtLeastOnce, true, payload) {
                    debug!("Heartbeat not sent: {e}");
                }
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Device {} connected", profile.device_id);
                    client
                        .try_subscribe(
                            questions_topic(&profile.prefix, &profile.family_id),
                            QoS::AtLeastOnce,
                        )
                        .map_err(transport_error)?;
                    client
                        .try_subscribe(
                            device_topic(&profile.prefix, &profile.family_id, &profile.device_id, "#"),
                            QoS::AtLeastOnce,
                        )
                        .map_err(transport_error)?;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match react(&profile, &publish.topic, &publish.payload, Utc::now()) {
                        Reaction::Answer { topic, payload } => {
                            info!("Answering on {topic}");
                            // The event loop is not polled while this arm runs.
                            if let Err(e) = client.try_publish(
                                topic,
                                QoS::AtLeastOnce,
                                false,
                                payload.to_string(),
                            ) {
                                warn!("Answer not sent: {e}");
                            }
                        }
                        Reaction::Evicted => {
                            warn!("Device {} evicted by gateway", profile.device_id);
                            break;
                        }
                        Reaction::Ignore => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Device connection error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    client.try_disconnect().map_err(transport_error)?;
    // Drive the loop until the disconnect has gone out.
    while let Ok(event) = eventloop.poll().await {
        if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
            break;
        }
    }
    Ok(())
}
