// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The adapter contract and its backends.
//!
//! # Architecture
//! Capabilities are separate traits so that consumers ask only for what they
//! use: validators need a [`SegmentReader`], the replicated engine needs the
//! full [`Adapter`]. Link writes ([`LinkWriter`]) and key/value writes
//! ([`KeyValueWriter`]) are independent capabilities.
//!
//! # Guarantees
//! - Links are write-once: re-creating a fingerprint fails with `ALREADY_EXISTS`
//! - `find_segments` follows `popstore_kernel::filter::SortKey` ordering
//! - Events are emitted after persistence, in commit order

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use popstore_kernel::event::StoreEvent;
use popstore_kernel::filter::{MapFilter, SegmentFilter};
use popstore_kernel::types::{Evidence, Evidences, Link, LinkHash, Segment};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{BackendKind, NodeConfig};
use crate::context::Context;
use crate::errors::{Result, StoreError};

pub mod batch;
pub mod couch;
pub mod elastic;
pub mod file;
pub mod memory;
pub mod sql;

pub use batch::{BufferedBatch, LinkOp, ValueOp};
pub use couch::CouchStore;
pub use elastic::ElasticStore;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use sql::SqliteStore;

/// Static description of a backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub commit: String,
}

impl StoreInfo {
    pub fn new(name: &str, description: &str, version: &str, commit: &str) -> Self {
        StoreInfo {
            name: name.to_string(),
            description: description.to_string(),
            version: version.to_string(),
            commit: commit.to_string(),
        }
    }
}

#[async_trait]
pub trait SegmentReader: Send + Sync {
    /// `Ok(None)` when the link is unknown.
    async fn get_segment(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Segment>>;

    async fn find_segments(&self, ctx: &Context, filter: &SegmentFilter) -> Result<Vec<Segment>>;

    async fn get_map_ids(&self, ctx: &Context, filter: &MapFilter) -> Result<Vec<String>>;
}

#[async_trait]
pub trait LinkWriter: Send + Sync {
    /// Stores a link and returns its fingerprint.
    async fn create_link(&self, ctx: &Context, link: Link) -> Result<LinkHash>;
}

#[async_trait]
pub trait EvidenceReader: Send + Sync {
    async fn get_evidences(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Evidences>;
}

#[async_trait]
pub trait EvidenceWriter: Send + Sync {
    /// Attaches an evidence. A second evidence from the same provider is ignored
    /// unless it completes a pending one.
    async fn add_evidence(&self, ctx: &Context, link_hash: &LinkHash, evidence: Evidence) -> Result<()>;
}

#[async_trait]
pub trait KeyValueReader: Send + Sync {
    async fn get_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
pub trait KeyValueWriter: Send + Sync {
    async fn set_value(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes a key and returns its previous value.
    async fn delete_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

pub trait KeyValueStore: KeyValueReader + KeyValueWriter {}

impl<T: KeyValueReader + KeyValueWriter + ?Sized> KeyValueStore for T {}

/// Staged writes with read-your-writes semantics.
#[async_trait]
pub trait Batch: SegmentReader + LinkWriter + KeyValueStore {
    /// Cancels a staged link creation.
    async fn delete_link(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Link>>;

    /// Flushes every staged operation to the wrapped adapter.
    async fn write(&mut self, ctx: &Context) -> Result<()>;

    fn as_reader(&self) -> &dyn SegmentReader;
}

/// The full adapter contract.
#[async_trait]
pub trait Adapter: SegmentReader + LinkWriter + EvidenceReader + EvidenceWriter + KeyValueStore {
    async fn get_info(&self, ctx: &Context) -> Result<StoreInfo>;

    async fn new_batch(&self, ctx: &Context) -> Result<Box<dyn Batch>>;

    fn add_store_event_channel(&self, tx: mpsc::Sender<StoreEvent>);

    fn as_reader(&self) -> &dyn SegmentReader;

    /// Older single-call write path: creates the link if it is not stored yet,
    /// then attaches each evidence of the segment.
    async fn save_segment(&self, ctx: &Context, segment: Segment) -> Result<LinkHash> {
        segment.check()?;
        let link_hash = segment.meta.link_hash;
        match self.create_link(ctx, segment.link).await {
            Ok(_) | Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
        for evidence in segment.meta.evidences {
            self.add_evidence(ctx, &link_hash, evidence).await?;
        }
        Ok(link_hash)
    }
}

/// Strictly increasing microsecond clock used for `createdAt`.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn starting_after(last: i64) -> Self {
        MonotonicClock {
            last: AtomicI64::new(last),
        }
    }

    pub fn now(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_micros();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = if wall > prev { wall } else { prev + 1 };
            match self.last.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Shape checks and fingerprinting shared by every `create_link`.
pub(crate) fn prepare_link(link: &Link) -> Result<LinkHash> {
    link.check()?;
    Ok(link.hash()?)
}

pub(crate) fn check_filter(filter: &SegmentFilter) -> Result<()> {
    filter.pagination.check()?;
    Ok(())
}

pub(crate) fn check_map_filter(filter: &MapFilter) -> Result<()> {
    filter.pagination.check()?;
    Ok(())
}

/// Opens the backend selected by `config`.
pub async fn open_backend(config: &NodeConfig) -> Result<Arc<dyn Adapter>> {
    let adapter: Arc<dyn Adapter> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryStore::new()),
        BackendKind::File => Arc::new(FileStore::open(&config.file_path).await?),
        BackendKind::Sqlite => Arc::new(SqliteStore::open(&config.sqlite_path, config.create_indexes).await?),
        BackendKind::Couch => Arc::new(
            CouchStore::open(couch::CouchConfig {
                address: config.couch_url.clone(),
                create_indexes: config.create_indexes,
            })
            .await?,
        ),
        BackendKind::Elastic => Arc::new(
            ElasticStore::open(elastic::ElasticConfig {
                address: config.elastic_url.clone(),
            })
            .await?,
        ),
    };
    tracing::info!(backend = %config.backend, "store opened");
    Ok(adapter)
}

pub(crate) fn record_link_created(backend: &'static str) {
    metrics::counter!("popstore_links_created_total", 1, "backend" => backend);
}

pub(crate) fn record_evidence_added(backend: &'static str) {
    metrics::counter!("popstore_evidences_added_total", 1, "backend" => backend);
}
