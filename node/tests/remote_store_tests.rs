// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Runs against live document-store and search-index servers.
//!
//! Skipped unless `POPSTORE_COUCH_URL` / `POPSTORE_ELASTIC_URL` is set. The
//! servers may hold data from earlier runs, so every test works in its own
//! freshly named process.

use std::sync::Arc;

use popstore_kernel::filter::{MapFilter, Pagination, SegmentFilter};
use popstore_kernel::types::{Evidence, EvidenceState, Link};
use popstore_node::context::Context;
use popstore_node::errors::ErrorKind;
use popstore_node::store::couch::CouchConfig;
use popstore_node::store::elastic::ElasticConfig;
use popstore_node::store::{
    Adapter, CouchStore, ElasticStore, EvidenceReader, EvidenceWriter, KeyValueReader, KeyValueWriter, LinkWriter,
    SegmentReader,
};
use serde_json::json;

fn fresh_process() -> String {
    format!("test-{}", uuid::Uuid::new_v4())
}

async fn couch() -> Option<Arc<dyn Adapter>> {
    let address = std::env::var("POPSTORE_COUCH_URL").ok()?;
    let config = CouchConfig {
        address,
        create_indexes: true,
    };
    Some(Arc::new(CouchStore::open(config).await.unwrap()))
}

async fn elastic() -> Option<ElasticStore> {
    let address = std::env::var("POPSTORE_ELASTIC_URL").ok()?;
    Some(ElasticStore::open(ElasticConfig { address }).await.unwrap())
}

async fn shared_behaviour(store: Arc<dyn Adapter>) {
    let ctx = Context::background();
    let process = fresh_process();

    let root = Link::new(&process, "m1", "init").with_tags(["a"]).with_priority(1.0);
    let root_hash = store.create_link(&ctx, root.clone()).await.unwrap();
    let child = Link::new(&process, "m1", "next").with_prev(root_hash).with_priority(2.0);
    let child_hash = store.create_link(&ctx, child).await.unwrap();
    store.create_link(&ctx, Link::new(&process, "m2", "init")).await.unwrap();

    let err = store.create_link(&ctx, root.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(store.get_segment(&ctx, &root_hash).await.unwrap().unwrap().link, root);

    let in_m1 = store
        .find_segments(&ctx, &SegmentFilter::default().with_process(&process).with_map_ids(["m1"]))
        .await
        .unwrap();
    let order: Vec<_> = in_m1.iter().map(|s| *s.link_hash()).collect();
    assert_eq!(order, vec![child_hash, root_hash]);

    let mut map_ids = store
        .get_map_ids(&ctx, &MapFilter::default().with_process(&process))
        .await
        .unwrap();
    map_ids.sort();
    assert_eq!(map_ids, vec!["m1", "m2"]);

    let float = Link::new(&process, "m3", "init")
        .with_priority(985.6906946328695)
        .with_state(json!({ "score": 0.1 + 0.2, "ratio": [-1.0 / 3.0] }));
    let float_hash = store.create_link(&ctx, float.clone()).await.unwrap();
    let back = store.get_segment(&ctx, &float_hash).await.unwrap().unwrap();
    back.check().unwrap();
    assert_eq!(back.link, float);
    assert_eq!(back.link.hash().unwrap(), float_hash);

    let pending = Evidence::new("bitcoin", "btc", json!({ "tx": 1 }), EvidenceState::Pending);
    let complete = Evidence::new("bitcoin", "btc", json!({ "tx": 1 }), EvidenceState::Complete);
    store.add_evidence(&ctx, &root_hash, pending.clone()).await.unwrap();
    store.add_evidence(&ctx, &root_hash, complete).await.unwrap();
    store.add_evidence(&ctx, &root_hash, pending).await.unwrap();
    let evidences = store.get_evidences(&ctx, &root_hash).await.unwrap();
    assert_eq!(evidences.len(), 1);
    assert_eq!(evidences.get_by_provider("btc").map(|e| e.state), Some(EvidenceState::Complete));

    let key = process.as_bytes();
    store.set_value(&ctx, key, b"v").await.unwrap();
    assert_eq!(store.get_value(&ctx, key).await.unwrap(), Some(b"v".to_vec()));
    assert_eq!(store.delete_value(&ctx, key).await.unwrap(), Some(b"v".to_vec()));
}

/// A second store opened on the same server orders its links after the first's.
async fn reopened_store_keeps_order<F>(first: Arc<dyn Adapter>, reopen: F)
where
    F: std::future::Future<Output = Arc<dyn Adapter>>,
{
    let ctx = Context::background();
    let process = fresh_process();
    let old = first.create_link(&ctx, Link::new(&process, "m", "init")).await.unwrap();
    drop(first);
    let second = reopen.await;
    let new = second.create_link(&ctx, Link::new(&process, "m", "next").with_prev(old)).await.unwrap();

    let found = second
        .find_segments(&ctx, &SegmentFilter::default().with_process(&process))
        .await
        .unwrap();
    let order: Vec<_> = found.iter().map(|s| *s.link_hash()).collect();
    assert_eq!(order, vec![new, old]);
}

#[tokio::test]
async fn test_couch_store() {
    let Some(store) = couch().await else {
        eprintln!("POPSTORE_COUCH_URL not set, skipping");
        return;
    };
    shared_behaviour(store).await;
}

#[tokio::test]
async fn test_elastic_store() {
    let Some(store) = elastic().await else {
        eprintln!("POPSTORE_ELASTIC_URL not set, skipping");
        return;
    };
    shared_behaviour(Arc::new(store)).await;
}

#[tokio::test]
async fn test_couch_reopen_keeps_order() {
    let Some(first) = couch().await else {
        eprintln!("POPSTORE_COUCH_URL not set, skipping");
        return;
    };
    reopened_store_keeps_order(first, async { couch().await.unwrap() }).await;
}

#[tokio::test]
async fn test_elastic_reopen_keeps_order() {
    let Some(first) = elastic().await else {
        eprintln!("POPSTORE_ELASTIC_URL not set, skipping");
        return;
    };
    reopened_store_keeps_order(Arc::new(first), async {
        Arc::new(elastic().await.unwrap()) as Arc<dyn Adapter>
    })
    .await;
}

#[tokio::test]
async fn test_elastic_full_text_search() {
    let Some(store) = elastic().await else {
        eprintln!("POPSTORE_ELASTIC_URL not set, skipping");
        return;
    };
    let ctx = Context::background();
    let process = fresh_process();
    let word = format!("w{}", uuid::Uuid::new_v4().simple());
    let link = Link::new(&process, "m", "init").with_state(json!({ "title": format!("vintage {word} lamp"), "price": 12 }));
    let h = store.create_link(&ctx, link).await.unwrap();
    store.create_link(&ctx, Link::new(&process, "m", "other")).await.unwrap();

    let found = store.search_state(&ctx, &word, &Pagination::default()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].link_hash(), &h);
}
