use chrono::Utc;
use tempfile::tempdir;

use super::*;
use crate::family::{AllowedDevice, Credentials, DeviceKind};

fn record(family_id: &str, enabled: bool) -> FamilyRecord {
    FamilyRecord {
        family_id: family_id.to_string(),
        enabled,
        credentials: Some(Credentials {
            username: format!("fam-{family_id}-0000aaaa"),
            password: "p".repeat(64),
            topic_prefix: format!("scribe/{family_id}ns"),
        }),
        allowed_devices: vec![AllowedDevice {
            device_id: format!("{family_id}-d1"),
            display_name: "Hall display".to_string(),
            kind: DeviceKind::Embedded,
            registered_at: Utc::now(),
        }],
        last_connection: None,
    }
}

fn answer(question_id: &str, family_id: &str, text: &str) -> AnswerRecord {
    AnswerRecord {
        question_id: question_id.to_string(),
        family_id: family_id.to_string(),
        device_id: "d1".to_string(),
        answer: text.to_string(),
        answered_at: Utc::now(),
        stored_at: Utc::now(),
    }
}

#[test]
fn test_load_family_returns_enabled_record() {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();

    let f1 = record("f1", true);
    store.save_family(&f1).unwrap();
    store.save_family(&record("f2", false)).unwrap();

    assert_eq!(store.load_family("f1").unwrap(), FamilyLookup::Enabled(f1));
    assert_eq!(store.load_family("f2").unwrap(), FamilyLookup::NotEnabled);
    assert_eq!(store.load_family("ghost").unwrap(), FamilyLookup::NotEnabled);
    assert_eq!(store.list_families().unwrap().len(), 2);
}

#[test]
fn test_save_family_overwrites() {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();

    let mut f1 = record("f1", true);
    store.save_family(&f1).unwrap();
    f1.allowed_devices.clear();
    store.save_family(&f1).unwrap();

    let families = store.list_families().unwrap();
    assert_eq!(families.len(), 1);
    assert!(families[0].allowed_devices.is_empty());
}

#[test]
fn test_answer_is_written_once() {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();

    assert!(store.record_answer(&answer("q1", "f1", "first")).unwrap());
    assert!(!store.record_answer(&answer("q1", "f1", "second")).unwrap());
    store.record_answer(&answer("q2", "f2", "other")).unwrap();

    let answers = store.answers_for("f1").unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].answer, "first");
}
