// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::types::{Evidence, EvidenceMerge, EvidenceState, Evidences, Hash32, Link, Segment};
use serde_json::json;

fn sample() -> Link {
    Link::new("p", "m", "init").with_state(json!({"n": 1, "name": "alice"}))
}

#[test]
fn test_hash_is_stable_over_field_order() {
    let raw_a = r#"{"state":{"name":"alice","n":1},"meta":{"process":"p","mapId":"m","type":"init"}}"#;
    let raw_b = r#"{"meta":{"type":"init","mapId":"m","process":"p"},"state":{"n":1,"name":"alice"}}"#;
    let a: Link = serde_json::from_str(raw_a).unwrap();
    let b: Link = serde_json::from_str(raw_b).unwrap();
    assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    assert_eq!(a.hash().unwrap(), sample().hash().unwrap());
}

#[test]
fn test_hash_changes_with_content() {
    let a = sample();
    let mut b = sample();
    b.state = json!({"n": 2, "name": "alice"});
    assert_ne!(a.hash().unwrap(), b.hash().unwrap());

    let c = sample().with_tags(["t"]);
    assert_ne!(a.hash().unwrap(), c.hash().unwrap());
}

#[test]
fn test_empty_prev_link_hash_means_root() {
    let raw = r#"{"state":{},"meta":{"process":"p","mapId":"m","type":"init","prevLinkHash":""}}"#;
    let link: Link = serde_json::from_str(raw).unwrap();
    assert!(link.is_root());
    assert_eq!(link.hash().unwrap(), Link::new("p", "m", "init").hash().unwrap());
}

#[test]
fn test_prev_link_hash_round_trips_as_hex() {
    let prev = Hash32::digest(b"parent");
    let link = Link::new("p", "m", "bid").with_prev(prev);
    let value = link.to_value().unwrap();
    assert_eq!(value["meta"]["prevLinkHash"], json!(prev.to_hex()));
    let back: Link = serde_json::from_value(value).unwrap();
    assert_eq!(back.meta.prev_link_hash, Some(prev));
}

#[test]
fn test_check_rejects_missing_fields() {
    assert!(Link::new("", "m", "t").check().is_err());
    assert!(Link::new("p", "", "t").check().is_err());
    assert!(Link::new("p", "m", "").check().is_err());
    assert!(Link::new("p", "m", "t").with_priority(f64::NAN).check().is_err());
    assert!(Link::new("p", "m", "t").with_priority(2.0).check().is_ok());
}

#[test]
fn test_segment_check_detects_tampering() {
    let mut segment = sample().segmentify().unwrap();
    assert!(segment.check().is_ok());
    segment.link.state = json!({"n": 99});
    assert!(segment.check().is_err());
}

#[test]
fn test_segment_json_shape() {
    let segment = Segment::from_link(sample()).unwrap();
    let value = serde_json::to_value(&segment).unwrap();
    assert_eq!(value["meta"]["linkHash"], json!(segment.link_hash().to_hex()));
    assert_eq!(value["meta"]["evidences"], json!([]));
    assert_eq!(value["link"]["meta"]["mapId"], json!("m"));
}

#[test]
fn test_evidences_one_per_provider() {
    let mut evidences = Evidences::new();
    let first = Evidence::new("dummy", "p1", json!({"v": 1}), EvidenceState::Complete);
    let second = Evidence::new("dummy", "p1", json!({"v": 2}), EvidenceState::Complete);
    assert_eq!(evidences.add(first.clone()), EvidenceMerge::Inserted);
    assert_eq!(evidences.add(second), EvidenceMerge::Ignored);
    assert_eq!(evidences.len(), 1);
    assert_eq!(evidences.get_by_provider("p1"), Some(&first));
}

#[test]
fn test_pending_evidence_is_upgraded() {
    let mut evidences = Evidences::new();
    evidences.add(Evidence::new("btc", "chain", json!(null), EvidenceState::Pending));
    let done = Evidence::new("btc", "chain", json!({"tx": "abc"}), EvidenceState::Complete);
    assert_eq!(evidences.add(done.clone()), EvidenceMerge::Upgraded);
    assert_eq!(evidences.get_by_provider("chain"), Some(&done));
    assert_eq!(evidences.add(Evidence::new("btc", "chain", json!(null), EvidenceState::Pending)), EvidenceMerge::Ignored);
}

/// xorshift64, enough to spread values over many exponents.
fn floats(seed: u64, count: usize) -> Vec<f64> {
    let mut x = seed;
    (0..count)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x >> 11) as f64 / (1u64 << 53) as f64 * 2000.0 - 1000.0
        })
        .collect()
}

#[test]
fn test_float_fields_survive_json_round_trip() {
    for (i, value) in floats(0x9E37_79B9_7F4A_7C15, 20_000).into_iter().enumerate() {
        let link = Link::new("p", format!("m{i}"), "init")
            .with_priority(value)
            .with_state(json!({"price": value / 3.0, "ratio": [value, 0.1 + 0.2]}));
        let hash = link.hash().unwrap();

        let bytes = serde_json::to_vec_pretty(&link).unwrap();
        let back: Link = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.meta.priority, Some(value), "priority {value}");
        assert_eq!(back.hash().unwrap(), hash, "priority {value}");
    }
}

#[test]
fn test_segment_with_floats_still_checks() {
    let link = Link::new("p", "m", "init")
        .with_priority(985.6906946328695)
        .with_state(json!({"score": 0.30000000000000004}));
    let segment = link.segmentify().unwrap();
    let text = serde_json::to_string(&segment).unwrap();
    let back: Segment = serde_json::from_str(&text).unwrap();
    back.check().unwrap();
    assert_eq!(back.meta.link_hash, segment.meta.link_hash);
}
