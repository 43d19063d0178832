// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Query filters, pagination and the result ordering shared by all backends.
//!
//! # Ordering
//! Segments are returned by `priority DESC` (absent priority last), then
//! `createdAt DESC`, then `linkHash ASC`. The last key makes the order total
//! so that concatenated pages never duplicate or skip a segment.

use core::cmp::Ordering;
use core::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::error::{KernelError, Result};
use crate::types::{Hash32, Link, LinkHash};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Pagination { offset, limit }
    }

    pub fn check(&self) -> Result<()> {
        if self.limit > MAX_LIMIT {
            return Err(KernelError::InvalidFilter(format!(
                "limit {} exceeds the maximum of {}",
                self.limit, MAX_LIMIT
            )));
        }
        Ok(())
    }

    /// Applies offset and limit to an already ordered result set.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

/// Filter on `prevLinkHash`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrevLinkFilter {
    /// Only root links (no predecessor). Encoded as `""`.
    Root,
    /// Only direct children of this link.
    Hash(LinkHash),
}

impl PrevLinkFilter {
    pub fn matches(&self, prev: Option<&LinkHash>) -> bool {
        match (self, prev) {
            (PrevLinkFilter::Root, None) => true,
            (PrevLinkFilter::Hash(want), Some(got)) => want == got,
            _ => false,
        }
    }
}

impl Serialize for PrevLinkFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PrevLinkFilter::Root => serializer.serialize_str(""),
            PrevLinkFilter::Hash(h) => h.serialize(serializer),
        }
    }
}

struct PrevLinkVisitor;

impl<'de> Visitor<'de> for PrevLinkVisitor {
    type Value = PrevLinkFilter;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an empty string or a hex link hash")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<PrevLinkFilter, E> {
        if v.is_empty() {
            return Ok(PrevLinkFilter::Root);
        }
        Hash32::from_hex(v).map(PrevLinkFilter::Hash).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for PrevLinkFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_str(PrevLinkVisitor)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentFilter {
    #[serde(flatten)]
    pub pagination: Pagination,
    /// Any-of.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_link_hash: Option<PrevLinkFilter>,
    /// Any-of.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link_hashes: Vec<LinkHash>,
    /// All-of.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl SegmentFilter {
    pub fn with_process(mut self, process: impl Into<String>) -> Self {
        self.process = Some(process.into());
        self
    }

    pub fn with_map_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prev(mut self, prev: PrevLinkFilter) -> Self {
        self.prev_link_hash = Some(prev);
        self
    }

    pub fn with_link_hashes(mut self, hashes: Vec<LinkHash>) -> Self {
        self.link_hashes = hashes;
        self
    }

    pub fn with_pagination(mut self, offset: usize, limit: usize) -> Self {
        self.pagination = Pagination::new(offset, limit);
        self
    }

    pub fn matches(&self, link: &Link, link_hash: &LinkHash) -> bool {
        if !self.map_ids.is_empty() && !self.map_ids.iter().any(|m| *m == link.meta.map_id) {
            return false;
        }
        if let Some(process) = &self.process {
            if *process != link.meta.process {
                return false;
            }
        }
        if let Some(prev) = &self.prev_link_hash {
            if !prev.matches(link.meta.prev_link_hash.as_ref()) {
                return false;
            }
        }
        if !self.link_hashes.is_empty() && !self.link_hashes.contains(link_hash) {
            return false;
        }
        self.tags.iter().all(|t| link.meta.tags.contains(t))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapFilter {
    #[serde(flatten)]
    pub pagination: Pagination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl MapFilter {
    pub fn with_process(mut self, process: impl Into<String>) -> Self {
        self.process = Some(process.into());
        self
    }

    pub fn matches(&self, map_id: &str, process: &str) -> bool {
        if let Some(p) = &self.process {
            if p != process {
                return false;
            }
        }
        if let Some(prefix) = &self.prefix {
            if !map_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(suffix) = &self.suffix {
            if !map_id.ends_with(suffix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Ordering key of a stored segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SortKey {
    pub priority: Option<f64>,
    /// Store-assigned creation time, microseconds.
    pub created_at: i64,
    pub link_hash: LinkHash,
}

impl SortKey {
    pub fn new(link: &Link, created_at: i64, link_hash: LinkHash) -> Self {
        SortKey {
            priority: link.meta.priority,
            created_at,
            link_hash,
        }
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    /// `Less` means "comes first".
    fn cmp(&self, other: &Self) -> Ordering {
        let by_priority = match (self.priority, other.priority) {
            (Some(a), Some(b)) => b.total_cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_priority
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| self.link_hash.cmp(&other.link_hash))
    }
}
