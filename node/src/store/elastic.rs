// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Search-index backend speaking the Elasticsearch REST API.
//!
//! # Architecture
//! - `links`: one document per link (`_id` = link hash). The link itself is
//!   kept in `_source` but not indexed; the query fields sit next to it as
//!   keywords, and `stateTokens` holds the text leaves of `state` for
//!   full-text search
//! - `evidences` and `values`: unindexed documents keyed by link hash and by
//!   hex key
//!
//! Writes use `refresh=wait_for` so that a successful write is visible to
//! the next search. Evidence updates use optimistic concurrency
//! (`if_seq_no` / `if_primary_term`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use popstore_kernel::event::StoreEvent;
use popstore_kernel::filter::{MapFilter, Pagination, PrevLinkFilter, SegmentFilter};
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

const NAME: &str = "elasticsearch";
const DESCRIPTION: &str = "Elasticsearch ledger store";

const INDEX_LINKS: &str = "links";
const INDEX_EVIDENCES: &str = "evidences";
const INDEX_VALUES: &str = "values";

const AGG_PAGE: usize = 1000;
const READY_ATTEMPTS: u32 = 10;
const UPDATE_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug)]
pub struct ElasticConfig {
    pub address: String,
}

fn links_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "link": { "type": "object", "enabled": false },
                "linkHash": { "type": "keyword" },
                "mapId": { "type": "keyword" },
                "process": { "type": "keyword" },
                "linkType": { "type": "keyword" },
                "prevLinkHash": { "type": "keyword" },
                "priority": { "type": "double" },
                "tags": { "type": "keyword" },
                "createdAt": { "type": "long" },
                "stateTokens": { "type": "text" }
            }
        }
    })
}

fn opaque_mapping() -> Value {
    json!({ "mappings": { "enabled": false } })
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkDoc {
    link: Link,
    link_hash: String,
    map_id: String,
    process: String,
    link_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_link_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<f64>,
    #[serde(default)]
    tags: Vec<String>,
    created_at: i64,
    #[serde(default)]
    state_tokens: String,
}

impl LinkDoc {
    fn new(link: Link, link_hash: &LinkHash, created_at: i64) -> Self {
        let mut tokens = Vec::new();
        collect_tokens(&link.state, &mut tokens);
        LinkDoc {
            link_hash: link_hash.to_hex(),
            map_id: link.meta.map_id.clone(),
            process: link.meta.process.clone(),
            link_type: link.meta.link_type.clone(),
            prev_link_hash: link.meta.prev_link_hash.map(|h| h.to_hex()),
            priority: link.meta.priority,
            tags: link.meta.tags.clone(),
            created_at,
            state_tokens: tokens.join(" "),
            link,
        }
    }
}

/// String and number leaves of a JSON value, depth first.
pub(crate) fn collect_tokens(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_tokens(v, out)),
        Value::Bool(_) | Value::Null => {}
    }
}

/// Bool query for a segment filter.
pub(crate) fn segment_query(filter: &SegmentFilter) -> Value {
    let mut must = Vec::new();
    let mut must_not = Vec::new();

    if let Some(process) = &filter.process {
        must.push(json!({ "term": { "process": process } }));
    }
    if !filter.map_ids.is_empty() {
        must.push(json!({ "terms": { "mapId": filter.map_ids } }));
    }
    if !filter.link_hashes.is_empty() {
        let ids: Vec<String> = filter.link_hashes.iter().map(|h| h.to_hex()).collect();
        must.push(json!({ "terms": { "linkHash": ids } }));
    }
    match &filter.prev_link_hash {
        Some(PrevLinkFilter::Root) => must_not.push(json!({ "exists": { "field": "prevLinkHash" } })),
        Some(PrevLinkFilter::Hash(h)) => must.push(json!({ "term": { "prevLinkHash": h.to_hex() } })),
        None => {}
    }
    for tag in &filter.tags {
        must.push(json!({ "term": { "tags": tag } }));
    }

    json!({ "bool": { "filter": must, "must_not": must_not } })
}

pub(crate) fn segment_search(filter: &SegmentFilter) -> Value {
    json!({
        "query": segment_query(filter),
        "sort": [
            { "priority": { "order": "desc", "missing": "_last" } },
            { "createdAt": { "order": "desc" } },
            { "linkHash": { "order": "asc" } }
        ],
        "from": filter.pagination.offset,
        "size": filter.pagination.limit,
    })
}

pub(crate) fn state_search(query: &str, pagination: &Pagination) -> Value {
    json!({
        "query": { "match": { "stateTokens": query } },
        "from": pagination.offset,
        "size": pagination.limit,
    })
}

pub(crate) fn map_ids_search(filter: &MapFilter, after: Option<&Value>) -> Value {
    let mut composite = json!({
        "size": AGG_PAGE,
        "sources": [ { "mapId": { "terms": { "field": "mapId" } } } ]
    });
    if let Some(after) = after {
        composite["after"] = after.clone();
    }
    let query = match &filter.process {
        Some(process) => json!({ "bool": { "filter": [ { "term": { "process": process } } ] } }),
        None => json!({ "match_all": {} }),
    };
    json!({ "size": 0, "query": query, "aggs": { "maps": { "composite": composite } } })
}

pub(crate) fn last_created_at_search() -> Value {
    json!({ "size": 0, "aggs": { "last": { "max": { "field": "createdAt" } } } })
}

/// The `max` aggregation is `null` on an empty index.
pub(crate) fn parse_last_created_at(body: &Value) -> Result<i64> {
    match body.pointer("/aggregations/last/value") {
        Some(Value::Null) => Ok(0),
        Some(v) => v
            .as_f64()
            .map(|f| f as i64)
            .ok_or_else(|| StoreError::Internal(format!("elasticsearch: unexpected createdAt aggregate {v}"))),
        None => Err(StoreError::Internal("elasticsearch: createdAt aggregate missing".into())),
    }
}

/// Stored evidences of a raw `GET _doc` answer, plus the conditional path
/// that only overwrites this exact version.
pub(crate) fn evidences_update(id: &str, body: &Value) -> Result<(Evidences, String)> {
    let corrupted = |what: &str| StoreError::Internal(format!("elasticsearch: evidences of {id}: {what}"));
    let source = body.pointer("/_source/evidences").ok_or_else(|| corrupted("no evidences field"))?;
    let evidences: Evidences = serde_json::from_value(source.clone()).map_err(|e| corrupted(&e.to_string()))?;
    let seq_no = body["_seq_no"].as_i64().ok_or_else(|| corrupted("no _seq_no"))?;
    let term = body["_primary_term"].as_i64().ok_or_else(|| corrupted("no _primary_term"))?;
    let path = format!("/{INDEX_EVIDENCES}/_doc/{id}?if_seq_no={seq_no}&if_primary_term={term}&refresh=wait_for");
    Ok((evidences, path))
}

fn unavailable(status: StatusCode, body: &Value) -> StoreError {
    let reason = body
        .pointer("/error/reason")
        .and_then(Value::as_str)
        .unwrap_or("unexpected response");
    StoreError::BackendUnavailable(format!("elasticsearch {status}: {reason}"))
}

#[derive(Clone)]
pub struct ElasticStore {
    base: Arc<String>,
    client: Client,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    clock: Arc<MonotonicClock>,
    events: EventBus,
}

impl ElasticStore {
    pub async fn open(config: ElasticConfig) -> Result<Self> {
        let store = ElasticStore {
            base: Arc::new(config.address.trim_end_matches('/').to_string()),
            client: Client::new(),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            clock: Arc::new(MonotonicClock::default()),
            events: EventBus::new(),
        };

        store.wait_ready().await?;
        store.create_index(INDEX_LINKS, links_mapping()).await?;
        store.create_index(INDEX_EVIDENCES, opaque_mapping()).await?;
        store.create_index(INDEX_VALUES, opaque_mapping()).await?;

        // Keep createdAt increasing across restarts.
        let body = store.search(INDEX_LINKS, &last_created_at_search()).await?;
        let last = parse_last_created_at(&body)?;
        tracing::info!(address = %store.base, last_created_at = last, "elasticsearch store ready");
        Ok(ElasticStore {
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
            tracing::warn!(attempt, error = %last_error, "elasticsearch not ready");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(5));
        }
        Err(StoreError::BackendUnavailable(format!(
            "elasticsearch not available: {last_error}"
        )))
    }

    async fn create_index(&self, index: &str, mapping: Value) -> Result<()> {
        let (status, body) = self.request(Method::PUT, &format!("/{index}"), Some(&mapping)).await?;
        let exists = body.pointer("/error/type").and_then(Value::as_str) == Some("resource_already_exists_exception");
        if status.is_success() || exists {
            return Ok(());
        }
        Err(unavailable(status, &body))
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

    /// The raw `GET _doc` answer, `None` when absent.
    async fn get_raw(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let (status, body) = self.request(Method::GET, &format!("/{index}/_doc/{id}"), None).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(body)),
            s => Err(unavailable(s, &body)),
        }
    }

    async fn get_source<T: serde::de::DeserializeOwned>(&self, index: &str, id: &str) -> Result<Option<T>> {
        match self.get_raw(index, id).await? {
            Some(mut body) => Ok(Some(serde_json::from_value(body["_source"].take())?)),
            None => Ok(None),
        }
    }

    async fn search(&self, index: &str, query: &Value) -> Result<Value> {
        let (status, body) = self
            .request(Method::POST, &format!("/{index}/_search"), Some(query))
            .await?;
        if !status.is_success() {
            return Err(unavailable(status, &body));
        }
        Ok(body)
    }

    async fn evidences_of(&self, link_hash: &LinkHash) -> Result<Evidences> {
        #[derive(Deserialize)]
        struct Doc {
            #[serde(default)]
            evidences: Evidences,
        }
        Ok(self
            .get_source::<Doc>(INDEX_EVIDENCES, &link_hash.to_hex())
            .await?
            .map(|d| d.evidences)
            .unwrap_or_default())
    }

    async fn hits_to_segments(&self, body: Value) -> Result<Vec<Segment>> {
        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| StoreError::Internal("elasticsearch: search returned no hits".into()))?;
        let mut out = Vec::with_capacity(hits.len());
        for mut hit in hits {
            let doc: LinkDoc = serde_json::from_value(hit["_source"].take())?;
            let hash = popstore_kernel::types::Hash32::from_hex(&doc.link_hash)?;
            let evidences = self.evidences_of(&hash).await?;
            out.push(Segment::with_hash(doc.link, hash, evidences));
        }
        Ok(out)
    }

    /// Full-text search over the string and number leaves of link states,
    /// best match first.
    pub async fn search_state(&self, ctx: &Context, query: &str, pagination: &Pagination) -> Result<Vec<Segment>> {
        pagination.check()?;
        ctx.run(async {
            let body = self.search(INDEX_LINKS, &state_search(query, pagination)).await?;
            self.hits_to_segments(body).await
        })
        .await
    }
}

#[async_trait]
impl SegmentReader for ElasticStore {
    async fn get_segment(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Segment>> {
        ctx.run(async {
            match self.get_source::<LinkDoc>(INDEX_LINKS, &link_hash.to_hex()).await? {
                Some(doc) => {
                    let evidences = self.evidences_of(link_hash).await?;
                    Ok(Some(Segment::with_hash(doc.link, *link_hash, evidences)))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn find_segments(&self, ctx: &Context, filter: &SegmentFilter) -> Result<Vec<Segment>> {
        check_filter(filter)?;
        ctx.run(async {
            let body = self.search(INDEX_LINKS, &segment_search(filter)).await?;
            self.hits_to_segments(body).await
        })
        .await
    }

    async fn get_map_ids(&self, ctx: &Context, filter: &MapFilter) -> Result<Vec<String>> {
        check_map_filter(filter)?;
        ctx.run(async {
            let mut ids = Vec::new();
            let mut after: Option<Value> = None;
            loop {
                let body = self.search(INDEX_LINKS, &map_ids_search(filter, after.as_ref())).await?;
                let buckets = body
                    .pointer("/aggregations/maps/buckets")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if buckets.is_empty() {
                    break;
                }
                for bucket in &buckets {
                    if let Some(map_id) = bucket.pointer("/key/mapId").and_then(Value::as_str) {
                        // Process was filtered server-side.
                        if filter.matches(map_id, filter.process.as_deref().unwrap_or_default()) {
                            ids.push(map_id.to_string());
                        }
                    }
                }
                after = body.pointer("/aggregations/maps/after_key").cloned();
                if after.is_none() || buckets.len() < AGG_PAGE {
                    break;
                }
            }
            Ok(filter.pagination.apply(ids))
        })
        .await
    }
}

#[async_trait]
impl LinkWriter for ElasticStore {
    async fn create_link(&self, ctx: &Context, link: Link) -> Result<LinkHash> {
        let link_hash = prepare_link(&link)?;
        let guard = self.write_lock.lock().await;

        ctx.check()?;
        let doc = serde_json::to_value(LinkDoc::new(link.clone(), &link_hash, self.clock.now()))?;
        let path = format!("/{INDEX_LINKS}/_create/{}?refresh=wait_for", link_hash.to_hex());
        let (status, body) = self.request(Method::PUT, &path, Some(&doc)).await?;
        match status {
            StatusCode::CONFLICT => return Err(StoreError::AlreadyExists(link_hash)),
            s if s.is_success() => {}
            s => return Err(unavailable(s, &body)),
        }

        let permit = self.events.reserve().await;
        drop(guard);
        record_link_created(NAME);
        permit.emit(StoreEvent::saved_link(link)).await;
        Ok(link_hash)
    }
}

#[async_trait]
impl EvidenceReader for ElasticStore {
    async fn get_evidences(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Evidences> {
        ctx.run(self.evidences_of(link_hash)).await
    }
}

#[async_trait]
impl EvidenceWriter for ElasticStore {
    async fn add_evidence(&self, ctx: &Context, link_hash: &LinkHash, evidence: Evidence) -> Result<()> {
        let guard = self.write_lock.lock().await;
        let id = link_hash.to_hex();

        ctx.check()?;
        let changed = async {
            if self.get_raw(INDEX_LINKS, &id).await?.is_none() {
                return Err(StoreError::NotFound(format!("link {link_hash}")));
            }
            for _ in 0..UPDATE_ATTEMPTS {
                let (mut evidences, path) = match self.get_raw(INDEX_EVIDENCES, &id).await? {
                    Some(body) => evidences_update(&id, &body)?,
                    None => (
                        Evidences::new(),
                        format!("/{INDEX_EVIDENCES}/_create/{id}?refresh=wait_for"),
                    ),
                };
                if !evidences.add(evidence.clone()).changed() {
                    return Ok(false);
                }
                let doc = json!({ "evidences": evidences });
                let (status, body) = self.request(Method::PUT, &path, Some(&doc)).await?;
                match status {
                    StatusCode::CONFLICT => continue,
                    s if s.is_success() => return Ok(true),
                    s => return Err(unavailable(s, &body)),
                }
            }
            Err(StoreError::BackendUnavailable(format!(
                "elasticsearch: evidences of {link_hash} kept conflicting"
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

#[derive(Serialize, Deserialize)]
struct ValueDoc {
    value: String,
}

#[async_trait]
impl KeyValueReader for ElasticStore {
    async fn get_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.run(async {
            match self.get_source::<ValueDoc>(INDEX_VALUES, &hex::encode(key)).await? {
                Some(doc) => base64::engine::general_purpose::STANDARD
                    .decode(doc.value)
                    .map(Some)
                    .map_err(|e| StoreError::Internal(format!("elasticsearch value: {e}"))),
                None => Ok(None),
            }
        })
        .await
    }
}

#[async_trait]
impl KeyValueWriter for ElasticStore {
    async fn set_value(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        let doc = serde_json::to_value(ValueDoc {
            value: base64::engine::general_purpose::STANDARD.encode(value),
        })?;
        let path = format!("/{INDEX_VALUES}/_doc/{}?refresh=wait_for", hex::encode(key));
        ctx.check()?;
        let (status, body) = self.request(Method::PUT, &path, Some(&doc)).await?;
        if !status.is_success() {
            return Err(unavailable(status, &body));
        }
        Ok(())
    }

    async fn delete_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let previous = self.get_value(ctx, key).await?;
        if previous.is_none() {
            return Ok(None);
        }
        let path = format!("/{INDEX_VALUES}/_doc/{}?refresh=wait_for", hex::encode(key));
        ctx.check()?;
        let (status, body) = self.request(Method::DELETE, &path, None).await?;
        match status {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(previous),
            s => Err(unavailable(s, &body)),
        }
    }
}

#[async_trait]
impl Adapter for ElasticStore {
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
