// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-memory backend.
//!
//! One read/write lock guards a `linkHash -> segment` map, a
//! `mapId -> {linkHash}` index and the key/value entries. Clones share state.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use popstore_kernel::event::StoreEvent;
use popstore_kernel::filter::{MapFilter, SegmentFilter, SortKey};
use popstore_kernel::types::{Evidence, Evidences, Link, LinkHash, Segment};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, RwLock};

use super::{
    check_filter, check_map_filter, prepare_link, record_evidence_added, record_link_created, Adapter, Batch,
    BufferedBatch, EvidenceReader, EvidenceWriter, KeyValueReader, KeyValueWriter, LinkWriter, MonotonicClock,
    SegmentReader, StoreInfo,
};
use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::events::EventBus;

const NAME: &str = "memory";
const DESCRIPTION: &str = "In-memory ledger store";

struct StoredLink {
    link: Link,
    evidences: Evidences,
    created_at: i64,
}

#[derive(Default)]
struct MemoryState {
    links: FxHashMap<LinkHash, StoredLink>,
    maps: FxHashMap<String, BTreeSet<LinkHash>>,
    values: FxHashMap<Vec<u8>, Vec<u8>>,
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    clock: Arc<MonotonicClock>,
    events: EventBus,
    version: String,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            state: Arc::new(RwLock::new(MemoryState::default())),
            clock: Arc::new(MonotonicClock::default()),
            events: EventBus::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.links.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn to_segment(hash: &LinkHash, stored: &StoredLink) -> Segment {
    Segment::with_hash(stored.link.clone(), *hash, stored.evidences.clone())
}

#[async_trait]
impl SegmentReader for MemoryStore {
    async fn get_segment(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Segment>> {
        ctx.check()?;
        let state = self.state.read().await;
        Ok(state.links.get(link_hash).map(|s| to_segment(link_hash, s)))
    }

    async fn find_segments(&self, ctx: &Context, filter: &SegmentFilter) -> Result<Vec<Segment>> {
        check_filter(filter)?;
        ctx.check()?;
        let state = self.state.read().await;

        // Narrow down through the map index when the filter names maps.
        let candidates: Vec<&LinkHash> = if filter.map_ids.is_empty() {
            state.links.keys().collect()
        } else {
            filter
                .map_ids
                .iter()
                .filter_map(|m| state.maps.get(m))
                .flat_map(|set| set.iter())
                .collect()
        };

        let mut matched: Vec<(SortKey, &LinkHash, &StoredLink)> = candidates
            .into_iter()
            .filter_map(|h| state.links.get(h).map(|s| (h, s)))
            .filter(|(h, s)| filter.matches(&s.link, h))
            .map(|(h, s)| (SortKey::new(&s.link, s.created_at, *h), h, s))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));

        let page = filter.pagination.apply(matched);
        Ok(page.into_iter().map(|(_, h, s)| to_segment(h, s)).collect())
    }

    async fn get_map_ids(&self, ctx: &Context, filter: &MapFilter) -> Result<Vec<String>> {
        check_map_filter(filter)?;
        ctx.check()?;
        let state = self.state.read().await;
        let mut ids: Vec<String> = state
            .maps
            .iter()
            .filter(|(map_id, hashes)| {
                hashes
                    .iter()
                    .next()
                    .and_then(|h| state.links.get(h))
                    .is_some_and(|s| filter.matches(map_id, &s.link.meta.process))
            })
            .map(|(map_id, _)| map_id.clone())
            .collect();
        ids.sort();
        Ok(filter.pagination.apply(ids))
    }
}

#[async_trait]
impl LinkWriter for MemoryStore {
    async fn create_link(&self, ctx: &Context, link: Link) -> Result<LinkHash> {
        let link_hash = prepare_link(&link)?;
        ctx.check()?;

        let mut state = self.state.write().await;
        if state.links.contains_key(&link_hash) {
            return Err(StoreError::AlreadyExists(link_hash));
        }
        state
            .maps
            .entry(link.meta.map_id.clone())
            .or_default()
            .insert(link_hash);
        state.links.insert(
            link_hash,
            StoredLink {
                link: link.clone(),
                evidences: Evidences::new(),
                created_at: self.clock.now(),
            },
        );

        let permit = self.events.reserve().await;
        drop(state);
        record_link_created(NAME);
        permit.emit(StoreEvent::saved_link(link)).await;
        Ok(link_hash)
    }
}

#[async_trait]
impl EvidenceReader for MemoryStore {
    async fn get_evidences(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Evidences> {
        ctx.check()?;
        let state = self.state.read().await;
        Ok(state
            .links
            .get(link_hash)
            .map(|s| s.evidences.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl EvidenceWriter for MemoryStore {
    async fn add_evidence(&self, ctx: &Context, link_hash: &LinkHash, evidence: Evidence) -> Result<()> {
        ctx.check()?;
        let mut state = self.state.write().await;
        let stored = state
            .links
            .get_mut(link_hash)
            .ok_or_else(|| StoreError::NotFound(format!("link {link_hash}")))?;
        if !stored.evidences.add(evidence.clone()).changed() {
            return Ok(());
        }

        let permit = self.events.reserve().await;
        drop(state);
        record_evidence_added(NAME);
        permit.emit(StoreEvent::saved_evidence(*link_hash, evidence)).await;
        Ok(())
    }
}

#[async_trait]
impl KeyValueReader for MemoryStore {
    async fn get_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        Ok(self.state.read().await.values.get(key).cloned())
    }
}

#[async_trait]
impl KeyValueWriter for MemoryStore {
    async fn set_value(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        ctx.check()?;
        self.state.write().await.values.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        Ok(self.state.write().await.values.remove(key))
    }
}

#[async_trait]
impl Adapter for MemoryStore {
    async fn get_info(&self, _ctx: &Context) -> Result<StoreInfo> {
        Ok(StoreInfo::new(NAME, DESCRIPTION, &self.version, ""))
    }

    async fn new_batch(&self, _ctx: &Context) -> Result<Box<dyn Batch>> {
        Ok(Box::new(BufferedBatch::new(Arc::new(self.clone()))))
    }

    fn add_store_event_channel(&self, tx: mpsc::Sender<StoreEvent>) {
        self.events.add_channel(tx);
    }

    fn as_reader(&self) -> &dyn SegmentReader {
        self
    }
}
