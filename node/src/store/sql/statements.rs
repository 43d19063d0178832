// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! SQL text for the SQLite backend.

use popstore_kernel::filter::{MapFilter, PrevLinkFilter, SegmentFilter};
use rusqlite::types::Value as SqlValue;

pub(super) const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS segments (
        link_hash  TEXT PRIMARY KEY,
        data       TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS evidences (
        link_hash TEXT NOT NULL,
        provider  TEXT NOT NULL,
        state     TEXT NOT NULL,
        data      TEXT NOT NULL,
        PRIMARY KEY (link_hash, provider)
    );
    CREATE TABLE IF NOT EXISTS kv (
        key   BLOB PRIMARY KEY,
        value BLOB NOT NULL
    );
";

/// Expression indexes over the JSON paths the filters use.
pub(super) const CREATE_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS segments_order_idx ON segments (
        json_extract(data, '$.meta.priority') DESC, created_at DESC, link_hash
    );
    CREATE INDEX IF NOT EXISTS segments_map_id_idx
        ON segments (json_extract(data, '$.meta.mapId'));
    CREATE INDEX IF NOT EXISTS segments_process_map_id_idx
        ON segments (json_extract(data, '$.meta.process'), json_extract(data, '$.meta.mapId'));
    CREATE INDEX IF NOT EXISTS segments_prev_link_hash_idx
        ON segments (json_extract(data, '$.meta.prevLinkHash'));
";

pub(super) const INSERT_LINK: &str = "
    INSERT INTO segments (link_hash, data, created_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT (link_hash) DO NOTHING
";

pub(super) const GET_LINK: &str = "SELECT data FROM segments WHERE link_hash = ?1";

pub(super) const LINK_EXISTS: &str = "SELECT 1 FROM segments WHERE link_hash = ?1";

pub(super) const MAX_CREATED_AT: &str = "SELECT COALESCE(MAX(created_at), 0) FROM segments";

pub(super) const GET_EVIDENCES: &str = "SELECT data FROM evidences WHERE link_hash = ?1 ORDER BY rowid";

/// Inserts an evidence, or completes a pending one from the same provider.
/// Affects zero rows when nothing changed.
pub(super) const UPSERT_EVIDENCE: &str = "
    INSERT INTO evidences (link_hash, provider, state, data)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (link_hash, provider) DO UPDATE
        SET state = excluded.state, data = excluded.data
        WHERE evidences.state = 'PENDING' AND excluded.state = 'COMPLETE'
";

pub(super) const GET_VALUE: &str = "SELECT value FROM kv WHERE key = ?1";

pub(super) const SET_VALUE: &str = "
    INSERT INTO kv (key, value) VALUES (?1, ?2)
    ON CONFLICT (key) DO UPDATE SET value = excluded.value
";

pub(super) const DELETE_VALUE: &str = "DELETE FROM kv WHERE key = ?1 RETURNING value";

const MAP_ID: &str = "json_extract(data, '$.meta.mapId')";
const PROCESS: &str = "json_extract(data, '$.meta.process')";
const PREV_LINK_HASH: &str = "json_extract(data, '$.meta.prevLinkHash')";
const PRIORITY: &str = "json_extract(data, '$.meta.priority')";

fn placeholders(params: &mut Vec<SqlValue>, values: impl IntoIterator<Item = SqlValue>) -> String {
    let mut marks = Vec::new();
    for v in values {
        params.push(v);
        marks.push(format!("?{}", params.len()));
    }
    marks.join(", ")
}

fn push(params: &mut Vec<SqlValue>, v: SqlValue) -> String {
    params.push(v);
    format!("?{}", params.len())
}

/// Builds the `find_segments` query for `filter`.
pub(super) fn find_segments(filter: &SegmentFilter) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let mut clauses: Vec<String> = Vec::new();

    if let Some(process) = &filter.process {
        let p = push(&mut params, SqlValue::Text(process.clone()));
        clauses.push(format!("{PROCESS} = {p}"));
    }
    if !filter.map_ids.is_empty() {
        let list = placeholders(&mut params, filter.map_ids.iter().cloned().map(SqlValue::Text));
        clauses.push(format!("{MAP_ID} IN ({list})"));
    }
    if !filter.link_hashes.is_empty() {
        let list = placeholders(&mut params, filter.link_hashes.iter().map(|h| SqlValue::Text(h.to_hex())));
        clauses.push(format!("link_hash IN ({list})"));
    }
    match &filter.prev_link_hash {
        Some(PrevLinkFilter::Root) => clauses.push(format!("{PREV_LINK_HASH} IS NULL")),
        Some(PrevLinkFilter::Hash(h)) => {
            let p = push(&mut params, SqlValue::Text(h.to_hex()));
            clauses.push(format!("{PREV_LINK_HASH} = {p}"));
        }
        None => {}
    }
    for tag in &filter.tags {
        let p = push(&mut params, SqlValue::Text(tag.clone()));
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM json_each(segments.data, '$.meta.tags') WHERE json_each.value = {p})"
        ));
    }

    let limit = push(&mut params, SqlValue::Integer(filter.pagination.limit as i64));
    let offset = push(&mut params, SqlValue::Integer(filter.pagination.offset as i64));

    let mut sql = String::from("SELECT link_hash, data FROM segments");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(
        " ORDER BY {PRIORITY} IS NULL, {PRIORITY} DESC, created_at DESC, link_hash ASC LIMIT {limit} OFFSET {offset}"
    ));
    (sql, params)
}

/// Builds the `get_map_ids` query for `filter`.
pub(super) fn get_map_ids(filter: &MapFilter) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let mut clauses: Vec<String> = Vec::new();

    if let Some(process) = &filter.process {
        let p = push(&mut params, SqlValue::Text(process.clone()));
        clauses.push(format!("{PROCESS} = {p}"));
    }
    if let Some(prefix) = filter.prefix.as_ref().filter(|s| !s.is_empty()) {
        let p = push(&mut params, SqlValue::Text(prefix.clone()));
        clauses.push(format!("substr({MAP_ID}, 1, length({p})) = {p}"));
    }
    if let Some(suffix) = filter.suffix.as_ref().filter(|s| !s.is_empty()) {
        let p = push(&mut params, SqlValue::Text(suffix.clone()));
        clauses.push(format!("substr({MAP_ID}, -length({p})) = {p}"));
    }

    let limit = push(&mut params, SqlValue::Integer(filter.pagination.limit as i64));
    let offset = push(&mut params, SqlValue::Integer(filter.pagination.offset as i64));

    let mut sql = format!("SELECT DISTINCT {MAP_ID} AS map_id FROM segments");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY map_id LIMIT {limit} OFFSET {offset}"));
    (sql, params)
}
