// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Links: the immutable, content-addressed records of the ledger.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical;
use crate::error::{KernelError, Result};
use crate::types::hash::{optional_hex, LinkHash};
use crate::types::segment::Segment;

/// An immutable record belonging to one map of one process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default = "empty_state")]
    pub state: Value,
    pub meta: LinkMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<Signature>,
}

fn empty_state() -> Value {
    Value::Object(Default::default())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkMeta {
    pub map_id: String,
    pub process: String,
    /// Also called the "action": selects the validators that apply.
    #[serde(rename = "type")]
    pub link_type: String,
    #[serde(default, with = "optional_hex", skip_serializing_if = "Option::is_none")]
    pub prev_link_hash: Option<LinkHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<LinkReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A cross-reference to a link of (possibly) another process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkReference {
    pub process: String,
    pub link_hash: LinkHash,
}

/// A signature over the part of the link selected by `payload`.
///
/// `public_key` and `signature` are base64; `payload` is a JMESPath
/// expression evaluated over the link's JSON form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    #[serde(rename = "type")]
    pub scheme: String,
    pub public_key: String,
    pub signature: String,
    pub payload: String,
}

impl Link {
    /// Starts a root link with an empty state.
    pub fn new(process: impl Into<String>, map_id: impl Into<String>, link_type: impl Into<String>) -> Self {
        Link {
            state: empty_state(),
            meta: LinkMeta {
                map_id: map_id.into(),
                process: process.into(),
                link_type: link_type.into(),
                prev_link_hash: None,
                priority: None,
                tags: Vec::new(),
                refs: Vec::new(),
                inputs: None,
                data: None,
            },
            signatures: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    pub fn with_prev(mut self, prev: LinkHash) -> Self {
        self.meta.prev_link_hash = Some(prev);
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.meta.priority = Some(priority);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_root(&self) -> bool {
        self.meta.prev_link_hash.is_none()
    }

    /// JSON form of the link, the document JMESPath payloads run against.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical::to_vec(self)
    }

    /// SHA-256 over the canonical encoding.
    pub fn hash(&self) -> Result<LinkHash> {
        Ok(LinkHash::digest(&self.canonical_bytes()?))
    }

    /// Structural checks every backend applies before hashing.
    pub fn check(&self) -> Result<()> {
        if self.meta.process.is_empty() {
            return Err(KernelError::InvalidLink("meta.process should be a non empty string".into()));
        }
        if self.meta.map_id.is_empty() {
            return Err(KernelError::InvalidLink("meta.mapId should be a non empty string".into()));
        }
        if self.meta.link_type.is_empty() {
            return Err(KernelError::InvalidLink("meta.type should be a non empty string".into()));
        }
        if let Some(p) = self.meta.priority {
            if !p.is_finite() {
                return Err(KernelError::InvalidLink("meta.priority should be a finite number".into()));
            }
        }
        for r in &self.meta.refs {
            if r.process.is_empty() {
                return Err(KernelError::InvalidLink("meta.refs[].process should be a non empty string".into()));
            }
        }
        for s in &self.signatures {
            if s.scheme.is_empty() || s.public_key.is_empty() || s.signature.is_empty() || s.payload.is_empty() {
                return Err(KernelError::InvalidLink("signatures[] fields should be non empty".into()));
            }
        }
        Ok(())
    }

    /// Wraps the link into a segment with no evidences.
    pub fn segmentify(self) -> Result<Segment> {
        Segment::from_link(self)
    }
}
