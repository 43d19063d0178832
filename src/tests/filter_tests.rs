// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::filter::{MapFilter, Pagination, PrevLinkFilter, SegmentFilter, SortKey};
use crate::types::{Hash32, Link};
use serde_json::json;

#[test]
fn test_filter_defaults_from_json() {
    let filter: SegmentFilter = serde_json::from_value(json!({"process": "p"})).unwrap();
    assert_eq!(filter.pagination, Pagination::new(0, DEFAULT_LIMIT));
    assert_eq!(filter.process.as_deref(), Some("p"));
    assert!(filter.prev_link_hash.is_none());
}

#[test]
fn test_prev_link_hash_filter_json() {
    let root: SegmentFilter = serde_json::from_value(json!({"prevLinkHash": ""})).unwrap();
    assert_eq!(root.prev_link_hash, Some(PrevLinkFilter::Root));

    let h = Hash32::digest(b"x");
    let child: SegmentFilter = serde_json::from_value(json!({"prevLinkHash": h.to_hex(), "limit": 5})).unwrap();
    assert_eq!(child.prev_link_hash, Some(PrevLinkFilter::Hash(h)));
    assert_eq!(child.pagination.limit, 5);
}

#[test]
fn test_segment_filter_matching() {
    let prev = Hash32::digest(b"prev");
    let link = Link::new("p", "m1", "bid").with_prev(prev).with_tags(["a", "b"]);
    let hash = link.hash().unwrap();

    assert!(SegmentFilter::default().matches(&link, &hash));
    assert!(SegmentFilter::default().with_map_ids(["m0", "m1"]).matches(&link, &hash));
    assert!(!SegmentFilter::default().with_map_ids(["m0"]).matches(&link, &hash));
    assert!(!SegmentFilter::default().with_process("q").matches(&link, &hash));
    assert!(SegmentFilter::default().with_tags(["a"]).matches(&link, &hash));
    assert!(SegmentFilter::default().with_tags(["a", "b"]).matches(&link, &hash));
    assert!(!SegmentFilter::default().with_tags(["a", "c"]).matches(&link, &hash));
    assert!(!SegmentFilter::default().with_prev(PrevLinkFilter::Root).matches(&link, &hash));
    assert!(SegmentFilter::default().with_prev(PrevLinkFilter::Hash(prev)).matches(&link, &hash));
    assert!(SegmentFilter::default().with_link_hashes(vec![hash]).matches(&link, &hash));
    assert!(!SegmentFilter::default().with_link_hashes(vec![prev]).matches(&link, &hash));
}

#[test]
fn test_map_filter_matching() {
    let filter = MapFilter {
        prefix: Some("order-".into()),
        suffix: Some("-eu".into()),
        ..MapFilter::default()
    };
    assert!(filter.matches("order-12-eu", "p"));
    assert!(!filter.matches("order-12-us", "p"));
    assert!(!filter.matches("invoice-12-eu", "p"));
    assert!(!filter.clone().with_process("q").matches("order-12-eu", "p"));
}

#[test]
fn test_pagination_bounds() {
    assert!(Pagination::new(0, MAX_LIMIT).check().is_ok());
    assert!(Pagination::new(0, MAX_LIMIT + 1).check().is_err());
    let page = Pagination::new(2, 3).apply((0..10).collect::<Vec<_>>());
    assert_eq!(page, vec![2, 3, 4]);
    assert!(Pagination::new(20, 3).apply((0..10).collect::<Vec<_>>()).is_empty());
}

#[test]
fn test_sort_key_order() {
    let h1 = Hash32::digest(b"1");
    let h2 = Hash32::digest(b"2");
    let high = SortKey { priority: Some(10.0), created_at: 1, link_hash: h1 };
    let low = SortKey { priority: Some(-5.0), created_at: 9, link_hash: h1 };
    let none_new = SortKey { priority: None, created_at: 8, link_hash: h1 };
    let none_old = SortKey { priority: None, created_at: 2, link_hash: h1 };
    let tie_a = SortKey { priority: None, created_at: 2, link_hash: h1.min(h2) };
    let tie_b = SortKey { priority: None, created_at: 2, link_hash: h1.max(h2) };

    let mut keys = vec![none_old, tie_b, low, none_new, high];
    keys.sort();
    assert_eq!(keys, vec![high, low, none_new, none_old, tie_b]);
    assert!(tie_a < tie_b);
}
