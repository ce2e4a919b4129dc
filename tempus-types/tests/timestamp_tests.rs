use proptest::prelude::*;
use serde_json::json;
use tempus_types::Timestamp;

// ── Construction ─────────────────────────────────────────────────

#[test]
fn now_is_after_epoch() {
    assert!(Timestamp::now().as_millis() > 0);
}

#[test]
fn from_millis_roundtrip() {
    assert_eq!(Timestamp::from_millis(42).as_millis(), 42);
    assert_eq!(Timestamp::from(42), Timestamp::from_millis(42));
}

// ── Parsing ──────────────────────────────────────────────────────

#[test]
fn parse_rfc3339_utc() {
    let ts = Timestamp::parse_rfc3339("1970-01-01T00:00:01Z").unwrap();
    assert_eq!(ts.as_millis(), 1000);
}

#[test]
fn parse_rfc3339_with_offset() {
    let ts = Timestamp::parse_rfc3339("1970-01-01T01:00:00+01:00").unwrap();
    assert_eq!(ts.as_millis(), 0);
}

#[test]
fn parse_rfc3339_invalid() {
    assert!(Timestamp::parse_rfc3339("yesterday").is_err());
}

#[test]
fn from_json_integer_and_string() {
    assert_eq!(Timestamp::from_json(&json!(200)).unwrap().as_millis(), 200);
    assert_eq!(
        Timestamp::from_json(&json!("1970-01-01T00:00:00.250Z"))
            .unwrap()
            .as_millis(),
        250
    );
}

#[test]
fn from_json_rejects_other_types() {
    assert!(Timestamp::from_json(&json!(true)).is_err());
    assert!(Timestamp::from_json(&json!(null)).is_err());
    assert!(Timestamp::from_json(&json!({"seconds": 1})).is_err());
}

#[test]
fn display_is_rfc3339() {
    assert_eq!(Timestamp::from_millis(0).to_string(), "1970-01-01T00:00:00.000Z");
}

// ── Intervals ────────────────────────────────────────────────────

#[test]
fn within_half_open_interval() {
    let from = Timestamp::from_millis(100);
    let to = Some(Timestamp::from_millis(200));

    assert!(!Timestamp::from_millis(99).within(from, to));
    assert!(Timestamp::from_millis(100).within(from, to));
    assert!(Timestamp::from_millis(199).within(from, to));
    assert!(!Timestamp::from_millis(200).within(from, to));
}

#[test]
fn within_open_ended_interval() {
    let from = Timestamp::from_millis(100);
    assert!(Timestamp::MAX.within(from, None));
    assert!(!Timestamp::MIN.within(from, None));
}

proptest! {
    #[test]
    fn ordering_follows_millis(a in any::<i64>(), b in any::<i64>()) {
        prop_assert_eq!(Timestamp::from_millis(a).cmp(&Timestamp::from_millis(b)), a.cmp(&b));
    }

    #[test]
    fn empty_interval_contains_nothing(t in any::<i64>(), at in any::<i64>()) {
        let bound = Timestamp::from_millis(t);
        prop_assert!(!Timestamp::from_millis(at).within(bound, Some(bound)));
    }
}
