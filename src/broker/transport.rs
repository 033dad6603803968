//! Broker seam
//!
//! Everything above the broker talks to it through `Transport`. The MQTT
//! implementation lives in `adapter`; `MemoryTransport` records commands on a
//! channel instead of sending them, for embedding and tests.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::broker::message::{Envelope, timestamp_secs};
use crate::broker::topic::{device_topic, status_topic};
use crate::family::{DeviceId, FamilyId};
use crate::utils::{GatewayError, Result};

/// A live session the gateway wants gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionTarget {
    pub family_id: FamilyId,
    pub client_id: DeviceId,
    /// Prefix the session was admitted under. After a rotation this is the
    /// revoked one.
    pub prefix: String,
}

impl EvictionTarget {
    /// The evict command for the device and an empty retained payload that
    /// clears its stale `connected` status.
    pub fn envelopes(&self) -> [Envelope; 2] {
        let command = Envelope::outbound(
            device_topic(&self.prefix, &self.family_id, &self.client_id, "control"),
            json!({
                "type": "evict",
                "content": "session terminated by gateway",
                "timestamp": timestamp_secs(Utc::now()),
            }),
        );
        let clear = Envelope::outbound(status_topic(&self.prefix, &self.client_id), Value::Null)
            .retained();
        [command, clear]
    }
}

pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Hand an envelope to the broker connection without waiting for the
    /// delivery handshake. Fails with `BrokerUnavailable` while disconnected.
    fn publish(&self, envelope: Envelope) -> Result<()>;

    fn force_disconnect(&self, target: &EvictionTarget) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Publish(Envelope),
    Disconnect(EvictionTarget),
}

#[derive(Debug)]
pub struct MemoryTransport {
    connected: AtomicBool,
    sender: mpsc::UnboundedSender<TransportCommand>,
}

impl MemoryTransport {
    /// A connected transport and the receiving end of its command log.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                connected: AtomicBool::new(true),
                sender,
            },
            receiver,
        )
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn send(&self, command: TransportCommand) -> Result<()> {
        if !self.is_connected() {
            return Err(GatewayError::BrokerUnavailable);
        }
        self.sender
            .send(command)
            .map_err(|_| GatewayError::Transport("command log closed".to_string()))
    }
}

impl Transport for MemoryTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, envelope: Envelope) -> Result<()> {
        self.send(TransportCommand::Publish(envelope))
    }

    fn force_disconnect(&self, target: &EvictionTarget) -> Result<()> {
        self.send(TransportCommand::Disconnect(target.clone()))
    }
}
