use arbor_core::{BbKey, Blackboard, StoreError};
use serde_json::json;

const COUNT: BbKey<u32> = BbKey::new("count");
const LABEL: BbKey<String> = BbKey::new("label");

#[test]
fn blackboard_set_get_remove_roundtrip() {
    let mut bb = Blackboard::new();
    assert!(!bb.contains(COUNT.name()));

    bb.set(COUNT, 123).unwrap();
    bb.set(LABEL, "hello".to_string()).unwrap();

    assert_eq!(bb.get(COUNT).unwrap(), Some(123));
    assert_eq!(bb.get(LABEL).unwrap().as_deref(), Some("hello"));

    assert_eq!(bb.remove(COUNT).unwrap(), Some(123));
    assert_eq!(bb.get(COUNT).unwrap(), None);
}

#[test]
fn blackboard_type_mismatch_is_an_error() {
    let mut bb = Blackboard::new();
    bb.set_value("count", json!("not a number"));

    let err = bb.get(COUNT).unwrap_err();
    assert!(matches!(err, StoreError::TypeMismatch { ref key, .. } if key == "count"));
}

#[test]
fn access_log_tracks_reads_writes_and_removals() {
    let mut bb = Blackboard::new();
    bb.set_value("a", json!(1));
    bb.set_value("b", json!(2));
    let _ = bb.take_access();

    let _ = bb.get_value("a");
    bb.set_value("c", json!(3));
    bb.remove_value("b");

    let access = bb.take_access();
    assert!(access.reads.contains("a"));
    assert!(access.writes.contains("c"));
    assert!(access.removals.contains("b"));

    assert!(bb.take_access().is_empty());
}

#[test]
fn peek_does_not_record_a_read() {
    let mut bb = Blackboard::new();
    bb.set_value("a", json!(true));
    let _ = bb.take_access();

    assert_eq!(bb.peek("a"), Some(&json!(true)));
    assert!(bb.take_access().reads.is_empty());
}

#[test]
fn write_after_remove_is_reported_as_write_only() {
    let mut bb = Blackboard::new();
    bb.set_value("a", json!(1));
    bb.remove_value("a");
    bb.set_value("a", json!(2));

    let access = bb.take_access();
    assert!(access.writes.contains("a"));
    assert!(!access.removals.contains("a"));
}
