//! MQTT adapter
//!
//! One `rumqttc` connection per gateway process. `connect` splits it in two:
//! - `MqttAdapter`: the publishing half, shared by every caller through the
//!   `Transport` trait. `try_publish` only enqueues on the client's request
//!   channel, so callers never wait on the network.
//! - `MqttLoop`: owns the event loop. It (re)subscribes on every `ConnAck`,
//!   forwards matching publishes to the gateway over a bounded channel and
//!   backs off exponentially when the connection drops.
//!
//! Messages published by others during an outage are not replayed; presence
//! heals from the next retained status and open exchanges expire on schedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, Publish, QoS};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::broker::message::{Envelope, RawMessage, timestamp_secs};
use crate::broker::topic::{TopicLayout, topic_matches};
use crate::broker::transport::{EvictionTarget, Transport};
use crate::config::{MqttSettings, ReconnectSettings};
use crate::utils::{GatewayError, Result};

/// `min(initial * 2^(attempt-1), max)`; attempt counts from 1.
pub fn backoff_delay(initial_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
}

fn gateway_status(client_id: &str, status: &str) -> Vec<u8> {
    json!({
        "status": status,
        "device_id": client_id,
        "timestamp": timestamp_secs(Utc::now()),
    })
    .to_string()
    .into_bytes()
}

#[derive(Clone)]
pub struct MqttAdapter {
    client: AsyncClient,
    client_id: String,
    layout: TopicLayout,
    connected: Arc<AtomicBool>,
}

pub struct MqttLoop {
    client: AsyncClient,
    eventloop: EventLoop,
    client_id: String,
    layout: TopicLayout,
    connected: Arc<AtomicBool>,
    inbound: mpsc::Sender<RawMessage>,
    reconnect: ReconnectSettings,
}

/// Build the connection. Nothing touches the network until `MqttLoop::run`
/// is polled.
pub fn connect(
    mqtt: &MqttSettings,
    reconnect: &ReconnectSettings,
) -> (MqttAdapter, MqttLoop, mpsc::Receiver<RawMessage>) {
    let layout = TopicLayout::new(&mqtt.topic_root);

    let mut options = MqttOptions::new(&mqtt.client_id, &mqtt.host, mqtt.port);
    options.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs));
    if let (Some(user), Some(pass)) = (&mqtt.username, &mqtt.password) {
        options.set_credentials(user, pass);
    }
    options.set_last_will(LastWill::new(
        layout.gateway_status(),
        gateway_status(&mqtt.client_id, "disconnected"),
        QoS::AtLeastOnce,
        true,
    ));

    let (client, eventloop) = AsyncClient::new(options, mqtt.channel_capacity);
    let (inbound, receiver) = mpsc::channel(mqtt.channel_capacity);
    let connected = Arc::new(AtomicBool::new(false));

    let adapter = MqttAdapter {
        client: client.clone(),
        client_id: mqtt.client_id.clone(),
        layout: layout.clone(),
        connected: connected.clone(),
    };
    let event_loop = MqttLoop {
        client,
        eventloop,
        client_id: mqtt.client_id.clone(),
        layout,
        connected,
        inbound,
        reconnect: reconnect.clone(),
    };

    (adapter, event_loop, receiver)
}

impl MqttAdapter {
    /// Announce a clean shutdown and close the connection.
    pub async fn disconnect(&self) {
        let _ = self.client.try_publish(
            self.layout.gateway_status(),
            QoS::AtLeastOnce,
            true,
            gateway_status(&self.client_id, "disconnected"),
        );
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect: {e}");
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Transport for MqttAdapter {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(GatewayError::BrokerUnavailable);
        }
        let payload = envelope.to_bytes()?;
        self.client
            .try_publish(
                envelope.topic.as_str(),
                envelope.qos.into(),
                envelope.retain,
                payload,
            )
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        debug!("Published to {}", envelope.topic);
        Ok(())
    }

    fn force_disconnect(&self, target: &EvictionTarget) -> Result<()> {
        for envelope in target.envelopes() {
            self.publish(envelope)?;
        }
        info!(
            "Evicted session {} of family {}",
            target.client_id, target.family_id
        );
        Ok(())
    }
}

impl MqttLoop {
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    attempt = 0;
                    self.connected.store(true, Ordering::SeqCst);
                    info!("Connected to MQTT broker");
                    self.on_connect();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if !self.forward(publish).await {
                        warn!("Inbound channel closed, stopping MQTT loop");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    attempt = attempt.saturating_add(1);
                    if let Some(max) = self.reconnect.max_attempts {
                        if attempt > max {
                            error!("MQTT connection lost, giving up after {max} attempts: {e}");
                            break;
                        }
                    }
                    let delay = backoff_delay(
                        self.reconnect.initial_backoff_ms,
                        self.reconnect.max_backoff_ms,
                        attempt,
                    );
                    warn!("MQTT connection error: {e}; retrying in {delay:?} (attempt {attempt})");
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!("MQTT loop stopped");
    }

    fn on_connect(&self) {
        for filter in self.layout.subscriptions() {
            match self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                Ok(()) => debug!("Subscribed to {filter}"),
                Err(e) => error!("Failed to subscribe to {filter}: {e}"),
            }
        }
        if let Err(e) = self.client.try_publish(
            self.layout.gateway_status(),
            QoS::AtLeastOnce,
            true,
            gateway_status(&self.client_id, "connected"),
        ) {
            warn!("Failed to publish gateway status: {e}");
        }
    }

    /// Returns false once the gateway side of the channel is gone.
    async fn forward(&mut self, publish: Publish) -> bool {
        let subscribed = self
            .layout
            .subscriptions()
            .iter()
            .any(|filter| topic_matches(filter, &publish.topic));
        if !subscribed {
            debug!("Ignoring publish on unsubscribed topic {}", publish.topic);
            return true;
        }

        let raw = RawMessage {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
            qos: publish.qos.into(),
            retain: publish.retain,
        };
        self.inbound.send(raw).await.is_ok()
    }
}
