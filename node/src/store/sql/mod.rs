// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Relational backend on SQLite.
//!
//! # Architecture
//! The connection sits behind a blocking mutex and every statement runs on
//! the blocking pool. Each link is one row of `segments` holding its JSON
//! document; filters and ordering run in SQL over `json_extract` expressions
//! (indexed when `create_indexes` is set) and `json_each` for tags.
//!
//! # Guarantees
//! - `create_link` is an `INSERT .. ON CONFLICT DO NOTHING`. Zero affected rows
//!   means the link already exists
//! - A batch commits in a single transaction: all of its writes land or none do
//! - Writers serialize on `write_lock`, so events leave in commit order

mod statements;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use popstore_kernel::event::StoreEvent;
use popstore_kernel::filter::{MapFilter, SegmentFilter};
use popstore_kernel::types::{Evidence, Evidences, Hash32, Link, LinkHash, Segment};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tokio::sync::mpsc;

use super::{
    check_filter, check_map_filter, prepare_link, record_evidence_added, record_link_created, Adapter, Batch,
    BufferedBatch, EvidenceReader, EvidenceWriter, KeyValueReader, KeyValueWriter, LinkOp, LinkWriter,
    MonotonicClock, SegmentReader, StoreInfo, ValueOp,
};
use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::events::EventBus;

const NAME: &str = "sqlite";
const DESCRIPTION: &str = "SQLite ledger store";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    clock: Arc<MonotonicClock>,
    events: EventBus,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>, create_indexes: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || Connection::open(path)).await??;
        Self::init(conn, create_indexes).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(Connection::open_in_memory).await??;
        Self::init(conn, true).await
    }

    async fn init(conn: Connection, create_indexes: bool) -> Result<Self> {
        let (conn, last) = tokio::task::spawn_blocking(move || -> Result<(Connection, i64)> {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn.execute_batch(statements::CREATE_TABLES)?;
            if create_indexes {
                conn.execute_batch(statements::CREATE_INDEXES)?;
            }
            let last: i64 = conn.query_row(statements::MAX_CREATED_AT, [], |row| row.get(0))?;
            Ok((conn, last))
        })
        .await??;

        tracing::info!(create_indexes, "sqlite store ready");
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            clock: Arc::new(MonotonicClock::starting_after(last)),
            events: EventBus::new(),
        })
    }

    /// Runs a read against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        ctx.run(self.blocking(f)).await
    }

    /// Runs a write. Cancellation is only observed before the statement
    /// starts: once spawned, the write runs to completion and its outcome is
    /// reported, so callers never see an error for a row that was stored.
    async fn write_conn<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        ctx.check()?;
        self.blocking(f).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await?
    }
}

fn insert_link(conn: &Connection, link_hash: &LinkHash, link: &Link, created_at: i64) -> Result<()> {
    let data = serde_json::to_string(link)?;
    let changed = conn
        .prepare_cached(statements::INSERT_LINK)?
        .execute(params![link_hash.to_hex(), data, created_at])?;
    if changed == 0 {
        return Err(StoreError::AlreadyExists(*link_hash));
    }
    Ok(())
}

fn load_evidences(conn: &Connection, link_hash: &str) -> Result<Evidences> {
    let mut stmt = conn.prepare_cached(statements::GET_EVIDENCES)?;
    let rows = stmt.query_map([link_hash], |row| row.get::<_, String>(0))?;
    let mut evidences = Evidences::new();
    for data in rows {
        evidences.add(serde_json::from_str::<Evidence>(&data?)?);
    }
    Ok(evidences)
}

fn load_segment(conn: &Connection, link_hash: &str, data: &str) -> Result<Segment> {
    let link: Link = serde_json::from_str(data)?;
    let hash = Hash32::from_hex(link_hash)?;
    Ok(Segment::with_hash(link, hash, load_evidences(conn, link_hash)?))
}

fn apply_value_ops(conn: &Connection, ops: &[ValueOp]) -> Result<()> {
    for op in ops {
        match op {
            ValueOp::Set { key, value } => {
                conn.prepare_cached(statements::SET_VALUE)?.execute(params![key, value])?;
            }
            ValueOp::Delete { key } => {
                conn.prepare_cached(statements::DELETE_VALUE)?
                    .query_row([key], |_| Ok(()))
                    .optional()?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl SegmentReader for SqliteStore {
    async fn get_segment(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Segment>> {
        let hex = link_hash.to_hex();
        self.with_conn(ctx, move |conn| {
            let data: Option<String> = conn
                .prepare_cached(statements::GET_LINK)?
                .query_row([&hex], |row| row.get(0))
                .optional()?;
            data.map(|d| load_segment(conn, &hex, &d)).transpose()
        })
        .await
    }

    async fn find_segments(&self, ctx: &Context, filter: &SegmentFilter) -> Result<Vec<Segment>> {
        check_filter(filter)?;
        let (sql, values) = statements::find_segments(filter);
        self.with_conn(ctx, move |conn| {
            let rows: Vec<(String, String)> = {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(values.iter()), |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
                rows
            };
            rows.iter().map(|(hash, data)| load_segment(conn, hash, data)).collect()
        })
        .await
    }

    async fn get_map_ids(&self, ctx: &Context, filter: &MapFilter) -> Result<Vec<String>> {
        check_map_filter(filter)?;
        let (sql, values) = statements::get_map_ids(filter);
        self.with_conn(ctx, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map(params_from_iter(values.iter()), |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
        .await
    }
}

#[async_trait]
impl LinkWriter for SqliteStore {
    async fn create_link(&self, ctx: &Context, link: Link) -> Result<LinkHash> {
        let link_hash = prepare_link(&link)?;
        let guard = self.write_lock.lock().await;

        let created_at = self.clock.now();
        let stored = link.clone();
        self.write_conn(ctx, move |conn| insert_link(conn, &link_hash, &stored, created_at))
            .await?;

        let permit = self.events.reserve().await;
        drop(guard);
        record_link_created(NAME);
        permit.emit(StoreEvent::saved_link(link)).await;
        Ok(link_hash)
    }
}

#[async_trait]
impl EvidenceReader for SqliteStore {
    async fn get_evidences(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Evidences> {
        let hex = link_hash.to_hex();
        self.with_conn(ctx, move |conn| load_evidences(conn, &hex)).await
    }
}

#[async_trait]
impl EvidenceWriter for SqliteStore {
    async fn add_evidence(&self, ctx: &Context, link_hash: &LinkHash, evidence: Evidence) -> Result<()> {
        let guard = self.write_lock.lock().await;

        let hex = link_hash.to_hex();
        let stored = evidence.clone();
        let changed = self
            .write_conn(ctx, move |conn| {
                let exists = conn
                    .prepare_cached(statements::LINK_EXISTS)?
                    .query_row([&hex], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    return Err(StoreError::NotFound(format!("link {hex}")));
                }
                let data = serde_json::to_string(&stored)?;
                let n = conn.prepare_cached(statements::UPSERT_EVIDENCE)?.execute(params![
                    hex,
                    stored.provider,
                    stored.state.as_str(),
                    data
                ])?;
                Ok(n > 0)
            })
            .await?;
        if !changed {
            return Ok(());
        }

        let permit = self.events.reserve().await;
        drop(guard);
        record_evidence_added(NAME);
        permit.emit(StoreEvent::saved_evidence(*link_hash, evidence)).await;
        Ok(())
    }
}

#[async_trait]
impl KeyValueReader for SqliteStore {
    async fn get_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = key.to_vec();
        self.with_conn(ctx, move |conn| {
            Ok(conn
                .prepare_cached(statements::GET_VALUE)?
                .query_row([&key], |row| row.get(0))
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl KeyValueWriter for SqliteStore {
    async fn set_value(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        let (key, value) = (key.to_vec(), value.to_vec());
        self.write_conn(ctx, move |conn| {
            conn.prepare_cached(statements::SET_VALUE)?.execute(params![key, value])?;
            Ok(())
        })
        .await
    }

    async fn delete_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = key.to_vec();
        self.write_conn(ctx, move |conn| {
            Ok(conn
                .prepare_cached(statements::DELETE_VALUE)?
                .query_row([&key], |row| row.get(0))
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl Adapter for SqliteStore {
    async fn get_info(&self, _ctx: &Context) -> Result<StoreInfo> {
        Ok(StoreInfo::new(NAME, DESCRIPTION, env!("CARGO_PKG_VERSION"), ""))
    }

    async fn new_batch(&self, _ctx: &Context) -> Result<Box<dyn Batch>> {
        Ok(Box::new(SqliteBatch {
            store: self.clone(),
            buffer: BufferedBatch::new(Arc::new(self.clone())),
        }))
    }

    fn add_store_event_channel(&self, tx: mpsc::Sender<StoreEvent>) {
        self.events.add_channel(tx);
    }

    fn as_reader(&self) -> &dyn SegmentReader {
        self
    }
}

/// Buffers like [`BufferedBatch`] but commits in one SQLite transaction and
/// announces all of its links in a single event.
pub struct SqliteBatch {
    store: SqliteStore,
    buffer: BufferedBatch<SqliteStore>,
}

#[async_trait]
impl SegmentReader for SqliteBatch {
    async fn get_segment(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Segment>> {
        self.buffer.get_segment(ctx, link_hash).await
    }

    async fn find_segments(&self, ctx: &Context, filter: &SegmentFilter) -> Result<Vec<Segment>> {
        self.buffer.find_segments(ctx, filter).await
    }

    async fn get_map_ids(&self, ctx: &Context, filter: &MapFilter) -> Result<Vec<String>> {
        self.buffer.get_map_ids(ctx, filter).await
    }
}

#[async_trait]
impl LinkWriter for SqliteBatch {
    async fn create_link(&self, ctx: &Context, link: Link) -> Result<LinkHash> {
        self.buffer.create_link(ctx, link).await
    }
}

#[async_trait]
impl KeyValueReader for SqliteBatch {
    async fn get_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.buffer.get_value(ctx, key).await
    }
}

#[async_trait]
impl KeyValueWriter for SqliteBatch {
    async fn set_value(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        self.buffer.set_value(ctx, key, value).await
    }

    async fn delete_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.buffer.delete_value(ctx, key).await
    }
}

#[async_trait]
impl Batch for SqliteBatch {
    async fn delete_link(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Link>> {
        self.buffer.delete_link(ctx, link_hash).await
    }

    async fn write(&mut self, ctx: &Context) -> Result<()> {
        let (values, links) = self.buffer.take_ops();
        if values.is_empty() && links.is_empty() {
            return Ok(());
        }
        let guard = self.store.write_lock.lock().await;

        let stamped: Vec<(LinkOp, i64)> = links.into_iter().map(|op| (op, self.store.clock.now())).collect();
        let saved: Vec<Link> = stamped.iter().map(|(op, _)| op.link.clone()).collect();
        self.store
            .write_conn(ctx, move |conn| {
                let tx = conn.transaction()?;
                apply_value_ops(&tx, &values)?;
                for (op, created_at) in &stamped {
                    insert_link(&tx, &op.link_hash, &op.link, *created_at)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        let permit = self.store.events.reserve().await;
        drop(guard);
        for _ in &saved {
            record_link_created(NAME);
        }
        metrics::counter!("popstore_batch_writes_total", 1);
        if !saved.is_empty() {
            permit.emit(StoreEvent::saved_links(saved)).await;
        }
        Ok(())
    }

    fn as_reader(&self) -> &dyn SegmentReader {
        self
    }
}
