// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Filesystem backend.
//!
//! One JSON file per link, `<dir>/<linkHash>.json`, holding the link, its
//! evidences and its `createdAt`. Values live under `<dir>/values/<hex key>`.
//! Every write goes to a temp file first and is renamed into place.
//!
//! Queries scan the whole directory under one store-wide lock. Fine for
//! development, not for large ledgers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use popstore_kernel::event::StoreEvent;
use popstore_kernel::filter::{MapFilter, SegmentFilter, SortKey};
use popstore_kernel::types::{Evidence, Evidences, Hash32, Link, LinkHash, Segment};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use super::{
    check_filter, check_map_filter, prepare_link, record_evidence_added, record_link_created, Adapter, Batch,
    BufferedBatch, EvidenceReader, EvidenceWriter, KeyValueReader, KeyValueWriter, LinkWriter, MonotonicClock,
    SegmentReader, StoreInfo,
};
use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::events::EventBus;

const NAME: &str = "file";
const DESCRIPTION: &str = "Filesystem ledger store";
const VALUES_DIR: &str = "values";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    link: Link,
    #[serde(default)]
    evidences: Evidences,
    created_at: i64,
}

#[derive(Clone)]
pub struct FileStore {
    root: Arc<PathBuf>,
    lock: Arc<RwLock<()>>,
    clock: Arc<MonotonicClock>,
    events: EventBus,
}

impl FileStore {
    /// Opens (or creates) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join(VALUES_DIR)).await?;

        let store = FileStore {
            root: Arc::new(root),
            lock: Arc::new(RwLock::new(())),
            clock: Arc::new(MonotonicClock::default()),
            events: EventBus::new(),
        };

        // Keep createdAt increasing across restarts.
        let last = store.scan().await?.iter().map(|(_, r)| r.created_at).max().unwrap_or(0);
        Ok(FileStore {
            clock: Arc::new(MonotonicClock::starting_after(last)),
            ..store
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn link_path(&self, link_hash: &LinkHash) -> PathBuf {
        self.root.join(format!("{}.json", link_hash.to_hex()))
    }

    fn value_path(&self, key: &[u8]) -> PathBuf {
        self.root.join(VALUES_DIR).join(hex::encode(key))
    }

    async fn read_record(&self, link_hash: &LinkHash) -> Result<Option<Record>> {
        match tokio::fs::read(self.link_path(link_hash)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, link_hash: &LinkHash, record: &Record) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.link_path(link_hash), &bytes).await
    }

    async fn scan(&self) -> Result<Vec<(LinkHash, Record)>> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(self.root.as_path()).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let Ok(link_hash) = Hash32::from_hex(stem) else {
                continue;
            };
            if let Some(record) = self.read_record(&link_hash).await? {
                out.push((link_hash, record));
            }
        }
        Ok(out)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SegmentReader for FileStore {
    async fn get_segment(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Segment>> {
        ctx.run(async {
            let _guard = self.lock.read().await;
            Ok(self
                .read_record(link_hash)
                .await?
                .map(|r| Segment::with_hash(r.link, *link_hash, r.evidences)))
        })
        .await
    }

    async fn find_segments(&self, ctx: &Context, filter: &SegmentFilter) -> Result<Vec<Segment>> {
        check_filter(filter)?;
        ctx.run(async {
            let _guard = self.lock.read().await;
            let mut matched: Vec<(SortKey, LinkHash, Record)> = self
                .scan()
                .await?
                .into_iter()
                .filter(|(h, r)| filter.matches(&r.link, h))
                .map(|(h, r)| (SortKey::new(&r.link, r.created_at, h), h, r))
                .collect();
            matched.sort_by(|a, b| a.0.cmp(&b.0));

            Ok(filter
                .pagination
                .apply(matched)
                .into_iter()
                .map(|(_, h, r)| Segment::with_hash(r.link, h, r.evidences))
                .collect())
        })
        .await
    }

    async fn get_map_ids(&self, ctx: &Context, filter: &MapFilter) -> Result<Vec<String>> {
        check_map_filter(filter)?;
        ctx.run(async {
            let _guard = self.lock.read().await;
            let mut ids: Vec<String> = self
                .scan()
                .await?
                .into_iter()
                .filter(|(_, r)| filter.matches(&r.link.meta.map_id, &r.link.meta.process))
                .map(|(_, r)| r.link.meta.map_id)
                .collect();
            ids.sort();
            ids.dedup();
            Ok(filter.pagination.apply(ids))
        })
        .await
    }
}

#[async_trait]
impl LinkWriter for FileStore {
    async fn create_link(&self, ctx: &Context, link: Link) -> Result<LinkHash> {
        let link_hash = prepare_link(&link)?;
        ctx.check()?;

        let guard = self.lock.write().await;
        if tokio::fs::try_exists(self.link_path(&link_hash)).await? {
            return Err(StoreError::AlreadyExists(link_hash));
        }
        let record = Record {
            link,
            evidences: Evidences::new(),
            created_at: self.clock.now(),
        };
        self.write_record(&link_hash, &record).await?;

        let permit = self.events.reserve().await;
        drop(guard);
        record_link_created(NAME);
        permit.emit(StoreEvent::saved_link(record.link)).await;
        Ok(link_hash)
    }
}

#[async_trait]
impl EvidenceReader for FileStore {
    async fn get_evidences(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Evidences> {
        ctx.run(async {
            let _guard = self.lock.read().await;
            Ok(self.read_record(link_hash).await?.map(|r| r.evidences).unwrap_or_default())
        })
        .await
    }
}

#[async_trait]
impl EvidenceWriter for FileStore {
    async fn add_evidence(&self, ctx: &Context, link_hash: &LinkHash, evidence: Evidence) -> Result<()> {
        ctx.check()?;
        let guard = self.lock.write().await;
        let mut record = self
            .read_record(link_hash)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("link {link_hash}")))?;
        if !record.evidences.add(evidence.clone()).changed() {
            return Ok(());
        }
        self.write_record(link_hash, &record).await?;

        let permit = self.events.reserve().await;
        drop(guard);
        record_evidence_added(NAME);
        permit.emit(StoreEvent::saved_evidence(*link_hash, evidence)).await;
        Ok(())
    }
}

#[async_trait]
impl KeyValueReader for FileStore {
    async fn get_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.run(async {
            let _guard = self.lock.read().await;
            match tokio::fs::read(self.value_path(key)).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}

#[async_trait]
impl KeyValueWriter for FileStore {
    async fn set_value(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        ctx.check()?;
        let _guard = self.lock.write().await;
        write_atomic(&self.value_path(key), value).await
    }

    async fn delete_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.check()?;
        let _guard = self.lock.write().await;
        let path = self.value_path(key);
        match tokio::fs::read(&path).await {
            Ok(previous) => {
                tokio::fs::remove_file(&path).await?;
                Ok(Some(previous))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Adapter for FileStore {
    async fn get_info(&self, _ctx: &Context) -> Result<StoreInfo> {
        Ok(StoreInfo::new(NAME, DESCRIPTION, env!("CARGO_PKG_VERSION"), ""))
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
