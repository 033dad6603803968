//! Message envelopes
//!
//! `Envelope` is the transient routing unit between gateway components and
//! the broker. It is never persisted.
//!
//! Notes on fields:
//! - `topic`: full broker topic, including the family prefix
//! - `payload`: JSON body; serialized once at publish time
//! - `qos`: delivery tier requested from the broker
//! - `retain`: ask the broker to keep the last value (presence uses this)
//! - `direction`: whether the gateway received or is sending the message

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for Qos {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => Qos::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => Qos::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => Qos::ExactlyOnce,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub topic: String,
    pub payload: Value,
    pub qos: Qos,
    pub retain: bool,
    pub direction: Direction,
}

impl Envelope {
    /// An outbound, non-retained QoS 1 message.
    pub fn outbound(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos: Qos::AtLeastOnce,
            retain: false,
            direction: Direction::Outbound,
        }
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        // An explicit null clears a retained topic.
        if self.payload.is_null() {
            return Ok(Vec::new());
        }
        serde_json::to_vec(&self.payload)
    }
}

/// A publish as it came off the wire, before any parsing. Decoding happens
/// on the gateway's dispatch path so malformed input is counted there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::AtLeastOnce,
            retain: false,
        }
    }
}

/// Seconds since the epoch with millisecond precision, as carried in the
/// `timestamp` field of every payload.
pub fn timestamp_secs(at: chrono::DateTime<chrono::Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
