use config::ConfigError;
use serde::Deserialize;

use crate::correlation::{duration_from_secs, timeout_from_secs};
use crate::family::validate_id;

/// Top-level configuration for the gateway process.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub mqtt: MqttSettings,
    pub gateway: GatewaySettings,
    pub reconnect: ReconnectSettings,
    pub persistence: PersistenceSettings,
    pub logging: LoggingSettings,
}

/// Address of the WebSocket control surface.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Connection parameters for the shared broker.
///
/// `username`/`password` are the gateway's own broker identity, not a
/// family's credentials.
#[derive(Debug, Deserialize, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub topic_root: String,
    pub channel_capacity: usize,
}

/// Timing and identity knobs for the correlation engine and presence tracker.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySettings {
    pub answer_timeout_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub sweep_interval_ms: u64,
    pub terminal_retention_secs: u64,
    pub backend_identity: String,
}

/// Bounded exponential backoff for broker reconnection.
///
/// `max_attempts = None` retries forever.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceSettings {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub mqtt: Option<PartialMqttSettings>,
    pub gateway: Option<PartialGatewaySettings>,
    pub reconnect: Option<PartialReconnectSettings>,
    pub persistence: Option<PartialPersistenceSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialMqttSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub topic_root: Option<String>,
    pub channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialGatewaySettings {
    pub answer_timeout_secs: Option<u64>,
    pub heartbeat_timeout_secs: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
    pub terminal_retention_secs: Option<u64>,
    pub backend_identity: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialReconnectSettings {
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPersistenceSettings {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            mqtt: MqttSettings {
                host: "localhost".to_string(),
                port: 1883,
                client_id: "scribe-gateway".to_string(),
                username: None,
                password: None,
                keep_alive_secs: 60,
                topic_root: "scribe".to_string(),
                channel_capacity: 256,
            },
            gateway: GatewaySettings {
                answer_timeout_secs: 30,
                heartbeat_timeout_secs: 120,
                sweep_interval_ms: 500,
                terminal_retention_secs: 300,
                backend_identity: "scribe-backend".to_string(),
            },
            reconnect: ReconnectSettings {
                initial_backoff_ms: 500,
                max_backoff_ms: 30_000,
                max_attempts: None,
            },
            persistence: PersistenceSettings {
                path: "gateway_db".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Overlay whatever the partial settings specify on top of the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.unwrap_or_default();
        let mqtt = partial.mqtt.unwrap_or_default();
        let gateway = partial.gateway.unwrap_or_default();
        let reconnect = partial.reconnect.unwrap_or_default();
        let persistence = partial.persistence.unwrap_or_default();
        let logging = partial.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            mqtt: MqttSettings {
                host: mqtt.host.unwrap_or(default.mqtt.host),
                port: mqtt.port.unwrap_or(default.mqtt.port),
                client_id: mqtt.client_id.unwrap_or(default.mqtt.client_id),
                username: mqtt.username.or(default.mqtt.username),
                password: mqtt.password.or(default.mqtt.password),
                keep_alive_secs: mqtt
                    .keep_alive_secs
                    .unwrap_or(default.mqtt.keep_alive_secs),
                topic_root: mqtt.topic_root.unwrap_or(default.mqtt.topic_root),
                channel_capacity: mqtt
                    .channel_capacity
                    .unwrap_or(default.mqtt.channel_capacity),
            },
            gateway: GatewaySettings {
                answer_timeout_secs: gateway
                    .answer_timeout_secs
                    .unwrap_or(default.gateway.answer_timeout_secs),
                heartbeat_timeout_secs: gateway
                    .heartbeat_timeout_secs
                    .unwrap_or(default.gateway.heartbeat_timeout_secs),
                sweep_interval_ms: gateway
                    .sweep_interval_ms
                    .unwrap_or(default.gateway.sweep_interval_ms),
                terminal_retention_secs: gateway
                    .terminal_retention_secs
                    .unwrap_or(default.gateway.terminal_retention_secs),
                backend_identity: gateway
                    .backend_identity
                    .unwrap_or(default.gateway.backend_identity),
            },
            reconnect: ReconnectSettings {
                initial_backoff_ms: reconnect
                    .initial_backoff_ms
                    .unwrap_or(default.reconnect.initial_backoff_ms),
                max_backoff_ms: reconnect
                    .max_backoff_ms
                    .unwrap_or(default.reconnect.max_backoff_ms),
                max_attempts: reconnect.max_attempts.or(default.reconnect.max_attempts),
            },
            persistence: PersistenceSettings {
                path: persistence.path.unwrap_or(default.persistence.path),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gateway = &self.gateway;
        let invalid =
            |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Message(msg)) };

        for (key, secs) in [
            ("answer_timeout_secs", gateway.answer_timeout_secs),
            ("heartbeat_timeout_secs", gateway.heartbeat_timeout_secs),
        ] {
            if let Err(e) = timeout_from_secs(secs) {
                return invalid(format!("gateway.{key}: {e}"));
            }
        }
        if duration_from_secs(gateway.terminal_retention_secs).is_none() {
            return invalid(format!(
                "gateway.terminal_retention_secs: {} is out of range",
                gateway.terminal_retention_secs
            ));
        }
        if gateway.sweep_interval_ms == 0 {
            return invalid("gateway.sweep_interval_ms must be positive".to_string());
        }
        if let Err(e) = validate_id("backend", &gateway.backend_identity) {
            return invalid(format!("gateway.backend_identity: {e}"));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return invalid("reconnect.initial_backoff_ms exceeds max_backoff_ms".to_string());
        }
        Ok(())
    }
}
