use super::load_config;
use super::settings::{PartialMqttSettings, PartialSettings, Settings};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.mqtt.port, 1883);
    assert_eq!(settings.mqtt.topic_root, "scribe");
    assert_eq!(settings.gateway.answer_timeout_secs, 30);
    assert_eq!(settings.gateway.backend_identity, "scribe-backend");
    assert_eq!(settings.reconnect.max_attempts, None);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_merge_keeps_defaults_for_missing_values() {
    let partial = PartialSettings {
        mqtt: Some(PartialMqttSettings {
            host: Some("broker.local".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };

    let settings = Settings::merge(partial);
    assert_eq!(settings.mqtt.host, "broker.local");
    assert_eq!(settings.mqtt.port, 1883);
    assert_eq!(settings.gateway.heartbeat_timeout_secs, 120);
}

#[test]
#[serial]
fn test_env_overrides_defaults() {
    temp_env::with_vars(
        [
            ("SCRIBE__MQTT__PORT", Some("1884")),
            ("SCRIBE__GATEWAY__ANSWER_TIMEOUT_SECS", Some("5")),
            ("SCRIBE__RECONNECT__MAX_ATTEMPTS", Some("3")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.mqtt.port, 1884);
            assert_eq!(cfg.gateway.answer_timeout_secs, 5);
            assert_eq!(cfg.reconnect.max_attempts, Some(3));
            assert_eq!(cfg.mqtt.host, "localhost");
        },
    );
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [mqtt]
        host = "mqtt.example"
        topic_root = "household"

        [gateway]
        heartbeat_timeout_secs = 45
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let result = load_config();

    // restore cwd before asserting so a failure does not leak state
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = result.expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.mqtt.host, "mqtt.example");
    assert_eq!(cfg.mqtt.topic_root, "household");
    assert_eq!(cfg.gateway.heartbeat_timeout_secs, 45);
    assert_eq!(cfg.gateway.answer_timeout_secs, 30);
}

#[test]
fn test_defaults_validate() {
    assert!(Settings::default().validate().is_ok());
}

#[test]
fn test_validate_rejects_unusable_gateway_values() {
    let mut zero_sweep = Settings::default();
    zero_sweep.gateway.sweep_interval_ms = 0;

    let mut huge_timeout = Settings::default();
    huge_timeout.gateway.answer_timeout_secs = u64::MAX;

    let mut zero_heartbeat = Settings::default();
    zero_heartbeat.gateway.heartbeat_timeout_secs = 0;

    let mut huge_retention = Settings::default();
    huge_retention.gateway.terminal_retention_secs = u64::MAX;

    let mut bad_backend = Settings::default();
    bad_backend.gateway.backend_identity = "backend/one".to_string();

    for settings in [zero_sweep, huge_timeout, zero_heartbeat, huge_retention, bad_backend] {
        assert!(settings.validate().is_err(), "{:?} passed", settings.gateway);
    }
}

#[test]
#[serial]
fn test_load_config_rejects_zero_sweep_interval() {
    temp_env::with_vars([("SCRIBE__GATEWAY__SWEEP_INTERVAL_MS", Some("0"))], || {
        let err = load_config().unwrap_err();
        assert!(err.to_string().contains("sweep_interval_ms"));
    });
}
