// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Behaviour every adapter must share, run against each backend.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use popstore_kernel::canonical;
use popstore_kernel::event::StoreEvent;
use popstore_kernel::filter::{MapFilter, PrevLinkFilter, SegmentFilter};
use popstore_kernel::types::{Evidence, EvidenceState, Link, LinkHash, Segment};
use popstore_node::context::Context;
use popstore_node::errors::{ErrorKind, StoreError};
use popstore_node::store::{
    Adapter, Batch, EvidenceReader, EvidenceWriter, KeyValueReader, KeyValueWriter, LinkWriter, SegmentReader,
};
use serde_json::json;
use tokio::sync::mpsc;

pub fn link(process: &str, map_id: &str, link_type: &str) -> Link {
    Link::new(process, map_id, link_type)
}

pub fn evidence(provider: &str, state: EvidenceState) -> Evidence {
    Evidence::new("bitcoin", provider, json!({ "txid": provider }), state)
}

fn hashes(segments: &[Segment]) -> Vec<LinkHash> {
    segments.iter().map(|s| *s.link_hash()).collect()
}

pub async fn create_and_read(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let l = link("p", "m", "init").with_state(json!({ "name": "alice", "n": 1 }));
    let h = store.create_link(&ctx, l.clone()).await.unwrap();
    assert_eq!(h, l.hash().unwrap());

    let segment = store.get_segment(&ctx, &h).await.unwrap().unwrap();
    assert_eq!(segment.link.meta.map_id, "m");
    assert_eq!(segment.link_hash(), &h);
    assert_eq!(
        canonical::to_vec(&segment.link).unwrap(),
        canonical::to_vec(&l).unwrap()
    );
    segment.check().unwrap();

    let unknown = link("p", "m", "other").hash().unwrap();
    assert!(store.get_segment(&ctx, &unknown).await.unwrap().is_none());
}

pub async fn links_are_immutable(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let l = link("p", "m", "init");
    store.create_link(&ctx, l.clone()).await.unwrap();

    let err = store.create_link(&ctx, l).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let found = store
        .find_segments(&ctx, &SegmentFilter::default().with_map_ids(["m"]))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

pub async fn malformed_links_are_rejected(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let err = store.create_link(&ctx, link("", "m", "init")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = store
        .create_link(&ctx, link("p", "m", "init").with_priority(f64::NAN))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(store.find_segments(&ctx, &SegmentFilter::default()).await.unwrap().is_empty());
}

pub async fn filters_select_matching_links(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let root = link("auction", "a1", "init").with_tags(["open", "eu"]);
    let root_hash = store.create_link(&ctx, root.clone()).await.unwrap();
    let bid = link("auction", "a1", "bid").with_prev(root_hash).with_tags(["eu"]);
    let bid_hash = store.create_link(&ctx, bid).await.unwrap();
    let other = link("auction", "a2", "init").with_tags(["open"]);
    let other_hash = store.create_link(&ctx, other).await.unwrap();
    let foreign = link("chat", "a1", "init").with_tags(["open", "eu"]);
    let foreign_hash = store.create_link(&ctx, foreign).await.unwrap();

    let by_process = store
        .find_segments(&ctx, &SegmentFilter::default().with_process("auction"))
        .await
        .unwrap();
    let got: HashSet<_> = hashes(&by_process).into_iter().collect();
    assert_eq!(got, HashSet::from([root_hash, bid_hash, other_hash]));

    let by_map = store
        .find_segments(&ctx, &SegmentFilter::default().with_map_ids(["a2", "missing"]))
        .await
        .unwrap();
    assert_eq!(hashes(&by_map), vec![other_hash]);

    let all_tags = store
        .find_segments(
            &ctx,
            &SegmentFilter::default().with_process("auction").with_tags(["open", "eu"]),
        )
        .await
        .unwrap();
    assert_eq!(hashes(&all_tags), vec![root_hash]);

    let roots = store
        .find_segments(&ctx, &SegmentFilter::default().with_prev(PrevLinkFilter::Root))
        .await
        .unwrap();
    let got: HashSet<_> = hashes(&roots).into_iter().collect();
    assert_eq!(got, HashSet::from([root_hash, other_hash, foreign_hash]));

    let children = store
        .find_segments(&ctx, &SegmentFilter::default().with_prev(PrevLinkFilter::Hash(root_hash)))
        .await
        .unwrap();
    assert_eq!(hashes(&children), vec![bid_hash]);

    let picked = store
        .find_segments(&ctx, &SegmentFilter::default().with_link_hashes(vec![foreign_hash, bid_hash]))
        .await
        .unwrap();
    let got: HashSet<_> = hashes(&picked).into_iter().collect();
    assert_eq!(got, HashSet::from([foreign_hash, bid_hash]));

    for segment in by_process.iter().chain(&all_tags).chain(&roots) {
        segment.check().unwrap();
    }
}

pub async fn results_are_ordered(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let low = store.create_link(&ctx, link("p", "m1", "a").with_priority(2.0)).await.unwrap();
    let none = store.create_link(&ctx, link("p", "m2", "a")).await.unwrap();
    let high = store.create_link(&ctx, link("p", "m3", "a").with_priority(5.0)).await.unwrap();
    let low_later = store.create_link(&ctx, link("p", "m4", "a").with_priority(2.0)).await.unwrap();

    let found = store.find_segments(&ctx, &SegmentFilter::default()).await.unwrap();
    assert_eq!(hashes(&found), vec![high, low_later, low, none]);
}

pub async fn pages_cover_results_once(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let mut created = HashSet::new();
    for i in 0..11 {
        let l = link("p", &format!("m{}", i % 3), "a").with_priority((i % 4) as f64);
        created.insert(store.create_link(&ctx, l).await.unwrap());
    }

    let mut seen = Vec::new();
    let mut offset = 0;
    loop {
        let page = store
            .find_segments(&ctx, &SegmentFilter::default().with_pagination(offset, 4))
            .await
            .unwrap();
        if page.is_empty() {
            break;
        }
        assert!(page.len() <= 4);
        seen.extend(hashes(&page));
        offset += 4;
    }
    assert_eq!(seen.len(), created.len());
    assert_eq!(seen.iter().copied().collect::<HashSet<_>>(), created);

    let too_big = SegmentFilter::default().with_pagination(0, 10_000);
    let err = store.find_segments(&ctx, &too_big).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

pub async fn map_ids_are_distinct_and_filtered(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    for (process, map_id, link_type) in [
        ("p", "order-1", "init"),
        ("p", "order-1", "ship"),
        ("p", "order-2", "init"),
        ("p", "invoice-2", "init"),
        ("q", "order-3", "init"),
    ] {
        store.create_link(&ctx, link(process, map_id, link_type)).await.unwrap();
    }

    let mut all = store.get_map_ids(&ctx, &MapFilter::default()).await.unwrap();
    all.sort();
    assert_eq!(all, vec!["invoice-2", "order-1", "order-2", "order-3"]);

    let mut in_p = store
        .get_map_ids(&ctx, &MapFilter::default().with_process("p"))
        .await
        .unwrap();
    in_p.sort();
    assert_eq!(in_p, vec!["invoice-2", "order-1", "order-2"]);

    let prefixed = MapFilter {
        prefix: Some("order-".into()),
        suffix: Some("2".into()),
        ..MapFilter::default()
    };
    assert_eq!(store.get_map_ids(&ctx, &prefixed).await.unwrap(), vec!["order-2"]);
}

pub async fn evidences_are_deduplicated(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let h = store.create_link(&ctx, link("p", "m", "init")).await.unwrap();

    store.add_evidence(&ctx, &h, evidence("btc", EvidenceState::Pending)).await.unwrap();
    store.add_evidence(&ctx, &h, evidence("btc", EvidenceState::Pending)).await.unwrap();
    store.add_evidence(&ctx, &h, evidence("eth", EvidenceState::Complete)).await.unwrap();

    let evidences = store.get_evidences(&ctx, &h).await.unwrap();
    assert_eq!(evidences.len(), 2);
    assert_eq!(
        evidences.get_by_provider("btc").map(|e| e.state),
        Some(EvidenceState::Pending)
    );

    store.add_evidence(&ctx, &h, evidence("btc", EvidenceState::Complete)).await.unwrap();
    store.add_evidence(&ctx, &h, evidence("btc", EvidenceState::Pending)).await.unwrap();
    let evidences = store.get_evidences(&ctx, &h).await.unwrap();
    assert_eq!(evidences.len(), 2);
    assert_eq!(
        evidences.get_by_provider("btc").map(|e| e.state),
        Some(EvidenceState::Complete)
    );

    let segment = store.get_segment(&ctx, &h).await.unwrap().unwrap();
    assert_eq!(segment.meta.evidences.len(), 2);

    let unknown = link("p", "m", "nope").hash().unwrap();
    assert!(store.get_evidences(&ctx, &unknown).await.unwrap().is_empty());
}

pub async fn save_segment_merges_evidences(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let mut segment = link("p", "m", "init").segmentify().unwrap();
    segment.meta.evidences.add(evidence("btc", EvidenceState::Pending));
    let h = store.save_segment(&ctx, segment.clone()).await.unwrap();

    segment.meta.evidences = Default::default();
    segment.meta.evidences.add(evidence("eth", EvidenceState::Complete));
    assert_eq!(store.save_segment(&ctx, segment).await.unwrap(), h);

    assert_eq!(store.get_evidences(&ctx, &h).await.unwrap().len(), 2);
}

pub async fn values_round_trip(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    assert!(store.get_value(&ctx, b"k").await.unwrap().is_none());

    store.set_value(&ctx, b"k", b"one").await.unwrap();
    store.set_value(&ctx, b"k", b"two").await.unwrap();
    assert_eq!(store.get_value(&ctx, b"k").await.unwrap(), Some(b"two".to_vec()));

    assert_eq!(store.delete_value(&ctx, b"k").await.unwrap(), Some(b"two".to_vec()));
    assert!(store.delete_value(&ctx, b"k").await.unwrap().is_none());
    assert!(store.get_value(&ctx, b"k").await.unwrap().is_none());
}

pub async fn batch_reads_its_own_writes(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let stored = store.create_link(&ctx, link("p", "m", "init")).await.unwrap();

    let mut batch = store.new_batch(&ctx).await.unwrap();
    let staged_link = link("p", "m", "next").with_prev(stored);
    let staged = batch.create_link(&ctx, staged_link.clone()).await.unwrap();
    batch.set_value(&ctx, b"k", b"v").await.unwrap();

    assert_eq!(batch.get_segment(&ctx, &staged).await.unwrap().unwrap().link, staged_link);
    assert!(batch.get_segment(&ctx, &stored).await.unwrap().is_some());
    assert_eq!(batch.get_value(&ctx, b"k").await.unwrap(), Some(b"v".to_vec()));
    assert!(store.get_segment(&ctx, &staged).await.unwrap().is_none());
    assert!(store.get_value(&ctx, b"k").await.unwrap().is_none());

    let err = batch.create_link(&ctx, link("p", "m", "init")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    let err = batch.delete_link(&ctx, &stored).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    batch.write(&ctx).await.unwrap();
    assert_eq!(store.get_segment(&ctx, &staged).await.unwrap().unwrap().link, staged_link);
    assert_eq!(store.get_value(&ctx, b"k").await.unwrap(), Some(b"v".to_vec()));
}

pub async fn batch_delete_drops_staged_link(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let mut batch = store.new_batch(&ctx).await.unwrap();
    let l = link("p", "m", "init");
    let h = batch.create_link(&ctx, l.clone()).await.unwrap();

    assert_eq!(batch.delete_link(&ctx, &h).await.unwrap(), Some(l));
    assert!(batch.get_segment(&ctx, &h).await.unwrap().is_none());

    batch.write(&ctx).await.unwrap();
    assert!(store.get_segment(&ctx, &h).await.unwrap().is_none());
}

async fn next_event(rx: &mut mpsc::Receiver<StoreEvent>) -> StoreEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event not delivered in time")
        .expect("channel closed")
}

pub async fn events_fan_out(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let (tx_a, mut rx_a) = mpsc::channel(16);
    let (tx_b, mut rx_b) = mpsc::channel(16);
    store.add_store_event_channel(tx_a);
    store.add_store_event_channel(tx_b);

    let first = link("p", "m", "init");
    let h = store.create_link(&ctx, first.clone()).await.unwrap();
    let second = link("p", "m", "next").with_prev(h);
    store.create_link(&ctx, second.clone()).await.unwrap();
    store.add_evidence(&ctx, &h, evidence("btc", EvidenceState::Complete)).await.unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        assert_eq!(next_event(rx).await, StoreEvent::saved_link(first.clone()));
        assert_eq!(next_event(rx).await, StoreEvent::saved_link(second.clone()));
        match next_event(rx).await {
            StoreEvent::SavedEvidences(map) => assert!(map.contains_key(&h)),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    // A rejected write announces nothing.
    assert!(store.create_link(&ctx, first).await.is_err());
    assert!(rx_a.try_recv().is_err());
}

pub async fn cancelled_context_is_honoured(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    ctx.cancel();
    let err = store.create_link(&ctx, link("p", "m", "init")).await.unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));
}

/// Links whose priority and state carry floats with no short decimal form.
pub fn float_links() -> Vec<Link> {
    [985.6906946328695, 0.1 + 0.2, -1.0 / 3.0, 1e-7 * 7.0]
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            link("p", "floats", &format!("t{i}"))
                .with_priority(v)
                .with_state(json!({ "score": v * 3.7, "ratio": [v, v / 9.0] }))
        })
        .collect()
}

/// Every link is readable back with its priority, state and hash intact.
pub async fn assert_links_stored(store: &dyn Adapter, links: &[Link]) {
    let ctx = Context::background();
    for l in links {
        let h = l.hash().unwrap();
        let segment = store.get_segment(&ctx, &h).await.unwrap().unwrap();
        segment.check().unwrap();
        assert_eq!(segment.link.hash().unwrap(), h);
        assert_eq!(segment.link.meta.priority, l.meta.priority);
        assert_eq!(segment.link.state, l.state);
    }
    let found = store
        .find_segments(&ctx, &SegmentFilter::default().with_map_ids(["floats"]))
        .await
        .unwrap();
    assert_eq!(found.len(), links.len());
    for segment in &found {
        segment.check().unwrap();
    }
}

pub async fn float_fields_keep_their_hash(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let links = float_links();
    for l in &links {
        store.create_link(&ctx, l.clone()).await.unwrap();
    }
    assert_links_stored(store.as_ref(), &links).await;
}

/// Runs every conformance check, each on a fresh store from `open`.
macro_rules! conformance_suite {
    ($open:expr) => {
        #[tokio::test]
        async fn test_create_and_read() {
            common::create_and_read($open.await).await;
        }

        #[tokio::test]
        async fn test_links_are_immutable() {
            common::links_are_immutable($open.await).await;
        }

        #[tokio::test]
        async fn test_malformed_links_are_rejected() {
            common::malformed_links_are_rejected($open.await).await;
        }

        #[tokio::test]
        async fn test_filters_select_matching_links() {
            common::filters_select_matching_links($open.await).await;
        }

        #[tokio::test]
        async fn test_results_are_ordered() {
            common::results_are_ordered($open.await).await;
        }

        #[tokio::test]
        async fn test_pages_cover_results_once() {
            common::pages_cover_results_once($open.await).await;
        }

        #[tokio::test]
        async fn test_map_ids_are_distinct_and_filtered() {
            common::map_ids_are_distinct_and_filtered($open.await).await;
        }

        #[tokio::test]
        async fn test_evidences_are_deduplicated() {
            common::evidences_are_deduplicated($open.await).await;
        }

        #[tokio::test]
        async fn test_save_segment_merges_evidences() {
            common::save_segment_merges_evidences($open.await).await;
        }

        #[tokio::test]
        async fn test_values_round_trip() {
            common::values_round_trip($open.await).await;
        }

        #[tokio::test]
        async fn test_batch_reads_its_own_writes() {
            common::batch_reads_its_own_writes($open.await).await;
        }

        #[tokio::test]
        async fn test_batch_delete_drops_staged_link() {
            common::batch_delete_drops_staged_link($open.await).await;
        }

        #[tokio::test]
        async fn test_events_fan_out() {
            common::events_fan_out($open.await).await;
        }

        #[tokio::test]
        async fn test_cancelled_context_is_honoured() {
            common::cancelled_context_is_honoured($open.await).await;
        }

        #[tokio::test]
        async fn test_float_fields_keep_their_hash() {
            common::float_fields_keep_their_hash($open.await).await;
        }
    };
}
