// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Document-store backend speaking the CouchDB HTTP API.
//!
//! # Architecture
//! Three databases:
//! - `links`: one `link` document per link (`_id` = link hash) and one `map`
//!   document per map (`_id` = `map-<hex(mapId)>`)
//! - `evidences`: one document per link hash holding its evidences
//! - `values`: one document per key (`_id` = hex key, value in base64)
//!
//! Queries go through Mango `_find` (paged with bookmarks); the result
//! ordering and pagination are applied client-side so that they match the
//! other backends exactly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use popstore_kernel::event::StoreEvent;
use popstore_kernel::filter::{MapFilter, PrevLinkFilter, SegmentFilter, SortKey};
use popstore_kernel::types::{Evidence, Evidences, Link, LinkHash, Segment};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{
    check_filter, check_map_filter, prepare_link, record_evidence_added, record_link_created, Adapter, Batch,
    BufferedBatch, EvidenceReader, EvidenceWriter, KeyValueReader, KeyValueWriter, LinkWriter, MonotonicClock,
    SegmentReader, StoreInfo,
};
use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::events::EventBus;

const NAME: &str = "couchdb";
const DESCRIPTION: &str = "CouchDB ledger store";

const DB_LINKS: &str = "links";
const DB_EVIDENCES: &str = "evidences";
const DB_VALUES: &str = "values";

const DOC_LINK: &str = "link";
const DOC_MAP: &str = "map";

const FIND_PAGE: usize = 1000;
const READY_ATTEMPTS: u32 = 10;
const UPDATE_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug)]
pub struct CouchConfig {
    pub address: String,
    pub create_indexes: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkDoc {
    #[serde(rename = "_id")]
    id: String,
    doc_type: String,
    link: Link,
    created_at: i64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapDoc {
    #[serde(rename = "_id")]
    id: String,
    doc_type: String,
    map_id: String,
    process: String,
}

#[derive(Serialize, Deserialize, Default)]
struct EvidencesDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    #[serde(default)]
    evidences: Evidences,
}

#[derive(Serialize, Deserialize)]
struct ValueDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    value: String,
}

#[derive(Clone)]
pub struct CouchStore {
    base: Arc<String>,
    client: Client,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    clock: Arc<MonotonicClock>,
    events: EventBus,
}

fn map_doc_id(map_id: &str) -> String {
    format!("map-{}", hex::encode(map_id))
}

/// Mango selector for a segment filter.
pub(crate) fn link_selector(filter: &SegmentFilter) -> Value {
    let mut selector = serde_json::Map::new();
    selector.insert("docType".into(), json!(DOC_LINK));
    if let Some(process) = &filter.process {
        selector.insert("link.meta.process".into(), json!(process));
    }
    if !filter.map_ids.is_empty() {
        selector.insert("link.meta.mapId".into(), json!({ "$in": filter.map_ids }));
    }
    if !filter.link_hashes.is_empty() {
        let ids: Vec<String> = filter.link_hashes.iter().map(|h| h.to_hex()).collect();
        selector.insert("_id".into(), json!({ "$in": ids }));
    }
    match &filter.prev_link_hash {
        Some(PrevLinkFilter::Root) => {
            selector.insert(
                "$or".into(),
                json!([
                    { "link.meta.prevLinkHash": { "$exists": false } },
                    { "link.meta.prevLinkHash": "" },
                ]),
            );
        }
        Some(PrevLinkFilter::Hash(h)) => {
            selector.insert("link.meta.prevLinkHash".into(), json!(h.to_hex()));
        }
        None => {}
    }
    if !filter.tags.is_empty() {
        selector.insert("link.meta.tags".into(), json!({ "$all": filter.tags }));
    }
    Value::Object(selector)
}

/// Mango selector for a map filter. Prefix and suffix are checked client-side.
pub(crate) fn map_selector(filter: &MapFilter) -> Value {
    let mut selector = json!({ "docType": DOC_MAP });
    if let Some(process) = &filter.process {
        selector["process"] = json!(process);
    }
    selector
}

fn unavailable(status: StatusCode, body: &Value) -> StoreError {
    let reason = body
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("unexpected response");
    StoreError::BackendUnavailable(format!("couchdb {status}: {reason}"))
}

/// Largest `createdAt` among projected link documents, 0 when there are none.
pub(crate) fn max_created_at(docs: &[Value]) -> Result<i64> {
    docs.iter().try_fold(0, |max, doc| {
        let created_at = doc
            .get("createdAt")
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::Internal(format!("couchdb link document without createdAt: {doc}")))?;
        Ok(max.max(created_at))
    })
}

impl CouchStore {
    /// Connects, waits for the server to answer and creates the databases.
    pub async fn open(config: CouchConfig) -> Result<Self> {
        let store = CouchStore {
            base: Arc::new(config.address.trim_end_matches('/').to_string()),
            client: Client::new(),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            clock: Arc::new(MonotonicClock::default()),
            events: EventBus::new(),
        };

        store.wait_ready().await?;
        for db in [DB_LINKS, DB_EVIDENCES, DB_VALUES] {
            store.create_database(db).await?;
        }
        if config.create_indexes {
            store.create_indexes().await?;
        }

        // Keep createdAt increasing across restarts.
        let stamps = store
            .find_fields(DB_LINKS, json!({ "docType": DOC_LINK }), Some(&["createdAt"]))
            .await?;
        let last = max_created_at(&stamps)?;
        tracing::info!(address = %store.base, last_created_at = last, "couchdb store ready");
        Ok(CouchStore {
            clock: Arc::new(MonotonicClock::starting_after(last)),
            ..store
        })
    }

    async fn wait_ready(&self) -> Result<()> {
        let mut delay = Duration::from_millis(200);
        let mut last_error = String::new();
        for attempt in 1..=READY_ATTEMPTS {
            match self.request(Method::GET, "/", None).await {
                Ok((status, _)) if status.is_success() => return Ok(()),
                Ok((status, body)) => last_error = unavailable(status, &body).to_string(),
                Err(e) => last_error = e.to_string(),
            }
            tracing::warn!(attempt, error = %last_error, "couchdb not ready");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(5));
        }
        Err(StoreError::BackendUnavailable(format!("couchdb not available: {last_error}")))
    }

    async fn create_database(&self, db: &str) -> Result<()> {
        let (status, body) = self.request(Method::PUT, &format!("/{db}"), None).await?;
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::PRECONDITION_FAILED => Ok(()),
            s => Err(unavailable(s, &body)),
        }
    }

    async fn create_indexes(&self) -> Result<()> {
        let indexes = [
            json!({ "index": { "fields": ["docType", "link.meta.process", "link.meta.mapId"] }, "name": "links-by-map" }),
            json!({ "index": { "fields": ["docType", "link.meta.prevLinkHash"] }, "name": "links-by-prev" }),
            json!({ "index": { "fields": ["docType", "process"] }, "name": "maps-by-process" }),
        ];
        for index in indexes {
            let (status, body) = self
                .request(Method::POST, &format!("/{DB_LINKS}/_index"), Some(&index))
                .await?;
            if !status.is_success() {
                return Err(unavailable(status, &body));
            }
        }
        Ok(())
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<(StatusCode, Value)> {
        let mut req = self.client.request(method, format!("{}{}", self.base, path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        if status.is_server_error() {
            return Err(unavailable(status, &value));
        }
        Ok((status, value))
    }

    async fn get_doc<T: serde::de::DeserializeOwned>(&self, db: &str, id: &str) -> Result<Option<T>> {
        let (status, body) = self.request(Method::GET, &format!("/{db}/{id}"), None).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(serde_json::from_value(body)?)),
            s => Err(unavailable(s, &body)),
        }
    }

    /// `Ok(false)` on a revision conflict.
    async fn put_doc<T: Serialize>(&self, db: &str, id: &str, doc: &T) -> Result<bool> {
        let doc = serde_json::to_value(doc)?;
        let (status, body) = self.request(Method::PUT, &format!("/{db}/{id}"), Some(&doc)).await?;
        match status {
            StatusCode::CONFLICT => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(unavailable(s, &body)),
        }
    }

    /// Every document matching `selector`, following bookmarks.
    async fn find_all(&self, db: &str, selector: Value) -> Result<Vec<Value>> {
        self.find_fields(db, selector, None).await
    }

    /// Same as `find_all`, optionally projected on `fields`.
    async fn find_fields(&self, db: &str, selector: Value, fields: Option<&[&str]>) -> Result<Vec<Value>> {
        let mut docs = Vec::new();
        let mut bookmark: Option<String> = None;
        loop {
            let mut query = json!({ "selector": selector, "limit": FIND_PAGE });
            if let Some(fields) = fields {
                query["fields"] = json!(fields);
            }
            if let Some(b) = &bookmark {
                query["bookmark"] = json!(b);
            }
            let (status, body) = self
                .request(Method::POST, &format!("/{db}/_find"), Some(&query))
                .await?;
            if !status.is_success() {
                return Err(unavailable(status, &body));
            }
            let page = body
                .get("docs")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| StoreError::Internal(format!("couchdb: _find on {db} returned no docs")))?;
            let done = page.len() < FIND_PAGE;
            docs.extend(page);
            if done {
                return Ok(docs);
            }
            bookmark = body.get("bookmark").and_then(Value::as_str).map(str::to_string);
            if bookmark.is_none() {
                return Ok(docs);
            }
        }
    }

    async fn evidences_of(&self, link_hash: &LinkHash) -> Result<Evidences> {
        Ok(self
            .get_doc::<EvidencesDoc>(DB_EVIDENCES, &link_hash.to_hex())
            .await?
            .map(|d| d.evidences)
            .unwrap_or_default())
    }

    async fn segmentify(&self, doc: LinkDoc) -> Result<Segment> {
        let hash = doc.link.hash()?;
        let evidences = self.evidences_of(&hash).await?;
        Ok(Segment::with_hash(doc.link, hash, evidences))
    }
}

#[async_trait]
impl SegmentReader for CouchStore {
    async fn get_segment(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Segment>> {
        ctx.run(async {
            match self.get_doc::<LinkDoc>(DB_LINKS, &link_hash.to_hex()).await? {
                Some(doc) => Ok(Some(self.segmentify(doc).await?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn find_segments(&self, ctx: &Context, filter: &SegmentFilter) -> Result<Vec<Segment>> {
        check_filter(filter)?;
        ctx.run(async {
            let mut docs: Vec<(SortKey, LinkDoc)> = Vec::new();
            for raw in self.find_all(DB_LINKS, link_selector(filter)).await? {
                let doc: LinkDoc = serde_json::from_value(raw)?;
                let hash = doc.link.hash()?;
                // The selector is a pre-filter; the kernel filter is authoritative.
                if filter.matches(&doc.link, &hash) {
                    docs.push((SortKey::new(&doc.link, doc.created_at, hash), doc));
                }
            }
            docs.sort_by(|a, b| a.0.cmp(&b.0));

            let mut out = Vec::new();
            for (_, doc) in filter.pagination.apply(docs) {
                out.push(self.segmentify(doc).await?);
            }
            Ok(out)
        })
        .await
    }

    async fn get_map_ids(&self, ctx: &Context, filter: &MapFilter) -> Result<Vec<String>> {
        check_map_filter(filter)?;
        ctx.run(async {
            let mut ids = Vec::new();
            for raw in self.find_all(DB_LINKS, map_selector(filter)).await? {
                let doc: MapDoc = serde_json::from_value(raw)?;
                if filter.matches(&doc.map_id, &doc.process) {
                    ids.push(doc.map_id);
                }
            }
            ids.sort();
            Ok(filter.pagination.apply(ids))
        })
        .await
    }
}

#[async_trait]
impl LinkWriter for CouchStore {
    async fn create_link(&self, ctx: &Context, link: Link) -> Result<LinkHash> {
        let link_hash = prepare_link(&link)?;
        let guard = self.write_lock.lock().await;
        ctx.check()?;

        let id = link_hash.to_hex();
        if self.get_doc::<Value>(DB_LINKS, &id).await?.is_some() {
            return Err(StoreError::AlreadyExists(link_hash));
        }

        // Every stored link has its map document. A conflict means the map
        // already exists.
        let map_id = map_doc_id(&link.meta.map_id);
        let map = MapDoc {
            id: map_id.clone(),
            doc_type: DOC_MAP.into(),
            map_id: link.meta.map_id.clone(),
            process: link.meta.process.clone(),
        };
        self.put_doc(DB_LINKS, &map_id, &map).await?;

        let doc = LinkDoc {
            id: id.clone(),
            doc_type: DOC_LINK.into(),
            link: link.clone(),
            created_at: self.clock.now(),
        };
        if !self.put_doc(DB_LINKS, &id, &doc).await? {
            return Err(StoreError::AlreadyExists(link_hash));
        }

        let permit = self.events.reserve().await;
        drop(guard);
        record_link_created(NAME);
        permit.emit(StoreEvent::saved_link(link)).await;
        Ok(link_hash)
    }
}

#[async_trait]
impl EvidenceReader for CouchStore {
    async fn get_evidences(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Evidences> {
        ctx.run(self.evidences_of(link_hash)).await
    }
}

#[async_trait]
impl EvidenceWriter for CouchStore {
    async fn add_evidence(&self, ctx: &Context, link_hash: &LinkHash, evidence: Evidence) -> Result<()> {
        let guard = self.write_lock.lock().await;
        let id = link_hash.to_hex();

        ctx.check()?;
        let changed = async {
            if self.get_doc::<Value>(DB_LINKS, &id).await?.is_none() {
                return Err(StoreError::NotFound(format!("link {link_hash}")));
            }
            for _ in 0..UPDATE_ATTEMPTS {
                let mut doc = self
                    .get_doc::<EvidencesDoc>(DB_EVIDENCES, &id)
                    .await?
                    .unwrap_or_else(|| EvidencesDoc {
                        id: id.clone(),
                        ..EvidencesDoc::default()
                    });
                if !doc.evidences.add(evidence.clone()).changed() {
                    return Ok(false);
                }
                if self.put_doc(DB_EVIDENCES, &id, &doc).await? {
                    return Ok(true);
                }
            }
            Err(StoreError::BackendUnavailable(format!(
                "couchdb: evidences of {link_hash} kept conflicting"
            )))
        }
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
impl KeyValueReader for CouchStore {
    async fn get_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.run(async {
            match self.get_doc::<ValueDoc>(DB_VALUES, &hex::encode(key)).await? {
                Some(doc) => {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(doc.value)
                        .map_err(|e| StoreError::Internal(format!("couchdb value: {e}")))?;
                    Ok(Some(bytes))
                }
                None => Ok(None),
            }
        })
        .await
    }
}

#[async_trait]
impl KeyValueWriter for CouchStore {
    async fn set_value(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        let id = hex::encode(key);
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        ctx.check()?;
        for _ in 0..UPDATE_ATTEMPTS {
            let rev = self.get_doc::<ValueDoc>(DB_VALUES, &id).await?.and_then(|d| d.rev);
            let doc = ValueDoc {
                id: id.clone(),
                rev,
                value: encoded.clone(),
            };
            if self.put_doc(DB_VALUES, &id, &doc).await? {
                return Ok(());
            }
        }
        Err(StoreError::BackendUnavailable(format!("couchdb: value {id} kept conflicting")))
    }

    async fn delete_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let previous = self.get_value(ctx, key).await?;
        let id = hex::encode(key);
        ctx.check()?;
        let Some(doc) = self.get_doc::<ValueDoc>(DB_VALUES, &id).await? else {
            return Ok(previous);
        };
        let rev = doc
            .rev
            .ok_or_else(|| StoreError::Internal(format!("couchdb: value {id} has no revision")))?;
        let (status, body) = self
            .request(Method::DELETE, &format!("/{DB_VALUES}/{id}?rev={rev}"), None)
            .await?;
        match status {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(previous),
            s => Err(unavailable(s, &body)),
        }
    }
}

#[async_trait]
impl Adapter for CouchStore {
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
