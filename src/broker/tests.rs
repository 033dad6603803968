use std::time::Duration;

use serde_json::{Value, json};

use super::topic::{device_topic, questions_topic, status_topic, topic_matches};
use super::*;
use crate::utils::GatewayError;

#[test]
fn test_parse_every_route() {
    let layout = TopicLayout::new("scribe");
    let prefix = "scribe/a1b2c3d4e5f6";

    let cases = [
        (
            status_topic(prefix, "d1"),
            Route::ClientStatus {
                device_id: "d1".into(),
            },
        ),
        (
            questions_topic(prefix, "f1"),
            Route::Questions {
                family_id: "f1".into(),
            },
        ),
        (
            format!("{prefix}/families/f1/answers"),
            Route::Answers {
                family_id: "f1".into(),
            },
        ),
        (
            format!("{prefix}/families/f1/notifications"),
            Route::Notifications {
                family_id: "f1".into(),
            },
        ),
        (
            format!("{prefix}/families/f1/request"),
            Route::Request {
                family_id: "f1".into(),
            },
        ),
        (
            device_topic(prefix, "f1", "d1", "reminders/today"),
            Route::DeviceDirected {
                family_id: "f1".into(),
                device_id: "d1".into(),
                channel: "reminders/today".into(),
            },
        ),
    ];

    for (topic, route) in cases {
        let parsed = layout.parse(&topic).unwrap();
        assert_eq!(parsed.prefix, prefix);
        assert_eq!(parsed.route, route, "{topic}");
    }
}

#[test]
fn test_parse_rejects_malformed_topics() {
    let layout = TopicLayout::new("scribe");
    for topic in [
        "other/ns/families/f1/answers",
        "scribe",
        "scribe/ns",
        "scribe/ns/families/f1",
        "scribe/ns/families/f1/answers/extra",
        "scribe/ns/families//answers",
        "scribe/ns/families/f1/devices/d1",
        "scribe/ns/clients/+/status",
        "scribeX/ns/families/f1/answers",
    ] {
        assert!(layout.parse(topic).is_none(), "{topic} should not parse");
    }
}

#[test]
fn test_subscriptions_cover_inbound_routes() {
    let layout = TopicLayout::new("scribe/");
    let subs = layout.subscriptions();
    assert_eq!(subs.len(), 4);

    let matches = |topic: &str| subs.iter().any(|f| topic_matches(f, topic));
    assert!(matches("scribe/ns/clients/d1/status"));
    assert!(matches("scribe/ns/families/f1/answers"));
    assert!(matches("scribe/ns/families/f1/notifications"));
    assert!(matches("scribe/ns/families/f1/request"));
    // The gateway's own outbound traffic is not echoed back.
    assert!(!matches("scribe/ns/families/f1/questions"));
    assert!(!matches("scribe/ns/families/f1/devices/d1/control"));
    assert!(!matches(&layout.gateway_status()));
}

#[test]
fn test_topic_matches_wildcards() {
    assert!(topic_matches("a/+/c", "a/b/c"));
    assert!(!topic_matches("a/+/c", "a/b/d"));
    assert!(!topic_matches("a/+", "a/b/c"));
    assert!(topic_matches("a/#", "a/b/c"));
    assert!(topic_matches("a/#", "a"));
    assert!(!topic_matches("a/b", "a"));
}

#[test]
fn test_backoff_delay_is_bounded() {
    assert_eq!(backoff_delay(500, 30_000, 1), Duration::from_millis(500));
    assert_eq!(backoff_delay(500, 30_000, 2), Duration::from_millis(1_000));
    assert_eq!(backoff_delay(500, 30_000, 4), Duration::from_millis(4_000));
    assert_eq!(backoff_delay(500, 30_000, 10), Duration::from_millis(30_000));
    assert_eq!(backoff_delay(500, 30_000, 200), Duration::from_millis(30_000));
}

#[test]
fn test_envelope_bytes() {
    let envelope = Envelope::outbound("t", json!({"a": 1}));
    assert_eq!(envelope.qos, Qos::AtLeastOnce);
    assert!(!envelope.retain);
    assert_eq!(envelope.direction, Direction::Outbound);
    assert_eq!(envelope.to_bytes().unwrap(), br#"{"a":1}"#.to_vec());

    let clear = Envelope::outbound("t", Value::Null).retained();
    assert!(clear.retain);
    assert!(clear.to_bytes().unwrap().is_empty());
}

#[test]
fn test_qos_maps_to_rumqttc() {
    assert_eq!(rumqttc::QoS::from(Qos::AtMostOnce), rumqttc::QoS::AtMostOnce);
    assert_eq!(Qos::from(rumqttc::QoS::ExactlyOnce), Qos::ExactlyOnce);
}

#[test]
fn test_eviction_envelopes() {
    let target = EvictionTarget {
        family_id: "f1".into(),
        client_id: "d1".into(),
        prefix: "scribe/ns".into(),
    };
    let [command, clear] = target.envelopes();
    assert_eq!(command.topic, "scribe/ns/families/f1/devices/d1/control");
    assert_eq!(command.payload["type"], "evict");
    assert_eq!(clear.topic, "scribe/ns/clients/d1/status");
    assert!(clear.retain);
    assert!(clear.payload.is_null());
}

#[tokio::test]
async fn test_memory_transport_records_and_fails_fast() {
    let (transport, mut rx) = MemoryTransport::new();
    assert!(transport.is_connected());

    transport
        .publish(Envelope::outbound("t", json!({"x": true})))
        .unwrap();
    match rx.recv().await.unwrap() {
        TransportCommand::Publish(envelope) => assert_eq!(envelope.topic, "t"),
        other => panic!("unexpected command {other:?}"),
    }

    transport.set_connected(false);
    assert!(matches!(
        transport.publish(Envelope::outbound("t", Value::Null)),
        Err(GatewayError::BrokerUnavailable)
    ));
    assert!(rx.try_recv().is_err());
}
