use std::time::Duration;

use chrono::Utc;

use super::simulator::{DeviceProfile, Reaction, answer_payload, react, status_payload};
use super::*;

fn session(client_id: &str, family_id: &str, username: &str) -> Session {
    Session {
        client_id: client_id.to_string(),
        family_id: family_id.to_string(),
        username: username.to_string(),
        opened_at: Utc::now(),
    }
}

fn profile() -> DeviceProfile {
    DeviceProfile {
        host: "localhost".to_string(),
        port: 1883,
        family_id: "f1".to_string(),
        device_id: "d1".to_string(),
        username: "fam-f1-abcd1234".to_string(),
        password: "secret".to_string(),
        prefix: "scribe/ns".to_string(),
        reply: "yes".to_string(),
        heartbeat: Duration::from_secs(30),
    }
}

#[test]
fn test_reconnect_replaces_session() {
    let mut table = SessionTable::new();
    assert!(table.open(session("d1", "f1", "u1")).is_none());
    let replaced = table.open(session("d1", "f1", "u2")).unwrap();
    assert_eq!(replaced.username, "u1");
    assert_eq!(table.len(), 1);
    assert_eq!(table.get("d1").unwrap().username, "u2");
}

#[test]
fn test_drain_by_username_and_family() {
    let mut table = SessionTable::new();
    table.open(session("d1", "f1", "u1"));
    table.open(session("d2", "f1", "u1"));
    table.open(session("d3", "f2", "u2"));

    let mut drained: Vec<_> = table
        .drain_username("u1")
        .into_iter()
        .map(|s| s.client_id)
        .collect();
    drained.sort();
    assert_eq!(drained, vec!["d1", "d2"]);
    assert_eq!(table.len(), 1);

    assert!(table.drain_family("f1").is_empty());
    assert_eq!(table.drain_family("f2").len(), 1);
    assert!(table.is_empty());
    assert!(table.close("d3").is_none());
}

#[test]
fn test_status_payload_carries_required_fields() {
    let body = status_payload(&profile(), "connected", Utc::now());
    assert_eq!(body["status"], "connected");
    assert_eq!(body["device_id"], "d1");
    assert_eq!(body["family_id"], "f1");
    assert!(body["timestamp"].is_f64());
}

#[test]
fn test_question_gets_answered() {
    let profile = profile();
    let question = br#"{"question_id":"q1","content":"Dinner?","timestamp":1.0}"#;

    match react(&profile, "scribe/ns/families/f1/questions", question, Utc::now()) {
        Reaction::Answer { topic, payload } => {
            assert_eq!(topic, "scribe/ns/families/f1/answers");
            assert_eq!(payload["question_id"], "q1");
            assert_eq!(payload["answer"], "yes");
            assert_eq!(payload["device_id"], "d1");
        }
        other => panic!("expected an answer, got {other:?}"),
    }
}

#[test]
fn test_evict_and_noise() {
    let profile = profile();
    let evict = br#"{"type":"evict","content":"bye","timestamp":1.0}"#;
    assert_eq!(
        react(&profile, "scribe/ns/families/f1/devices/d1/control", evict, Utc::now()),
        Reaction::Evicted
    );
    // An evict on some other channel is not a control command.
    assert_eq!(
        react(&profile, "scribe/ns/families/f1/devices/d1/chat", evict, Utc::now()),
        Reaction::Ignore
    );
    assert_eq!(
        react(&profile, "scribe/ns/families/f1/questions", b"not json", Utc::now()),
        Reaction::Ignore
    );
}

#[test]
fn test_answer_payload_shape() {
    let body = answer_payload("d9", "q7", "42", Utc::now());
    assert_eq!(body["question_id"], "q7");
    assert_eq!(body["device_id"], "d9");
    assert_eq!(body["answer"], "42");
}
