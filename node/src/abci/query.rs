// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Query dispatcher.
//!
//! Requests are `{path, data}` where `data` is the JSON encoding of the
//! path's arguments. Responses carry a code and the JSON encoded result.
//! Queries read committed state only.

use popstore_kernel::event::StoreEvent;
use popstore_kernel::filter::{MapFilter, SegmentFilter};
use popstore_kernel::types::{Evidence, LinkHash};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::app::ReplicatedEngine;
use super::{code_for, CODE_NOT_IMPLEMENTED, CODE_OK};
use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::store::{EvidenceReader, EvidenceWriter, SegmentReader};

pub const GET_INFO: &str = "GetInfo";
pub const GET_SEGMENT: &str = "GetSegment";
pub const FIND_SEGMENTS: &str = "FindSegments";
pub const GET_MAP_IDS: &str = "GetMapIDs";
pub const GET_EVIDENCES: &str = "GetEvidences";
pub const ADD_EVIDENCE: &str = "AddEvidence";
pub const PENDING_EVENTS: &str = "PendingEvents";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryRequest {
    pub path: String,
    pub data: Vec<u8>,
}

impl QueryRequest {
    /// Encodes `args` as the request data.
    pub fn new<T: Serialize>(path: &str, args: &T) -> Result<Self> {
        Ok(QueryRequest {
            path: path.to_string(),
            data: serde_json::to_vec(args)?,
        })
    }

    pub fn without_args(path: &str) -> Self {
        QueryRequest {
            path: path.to_string(),
            data: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryResponse {
    pub code: u32,
    pub value: Vec<u8>,
    pub log: String,
}

impl QueryResponse {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// Decodes the value of a successful response.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        if !self.is_ok() {
            return Err(StoreError::Internal(format!("query failed with code {}: {}", self.code, self.log)));
        }
        Ok(serde_json::from_slice(&self.value)?)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEvidenceArgs {
    pub link_hash: LinkHash,
    pub evidence: Evidence,
}

/// Arguments of `PendingEvents`. Each consumer has its own cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingEventsArgs {
    pub consumer: String,
}

fn args<T: DeserializeOwned + Default>(data: &[u8]) -> Result<T> {
    if data.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(data).map_err(|e| StoreError::InvalidArgument(format!("malformed query arguments: {e}")))
}

fn required<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| StoreError::InvalidArgument(format!("malformed query arguments: {e}")))
}

impl ReplicatedEngine {
    pub async fn query(&self, ctx: &Context, req: &QueryRequest) -> QueryResponse {
        let value = match req.path.as_str() {
            GET_INFO => to_json(&self.info()),
            GET_SEGMENT => self.get_segment(ctx, &req.data).await,
            FIND_SEGMENTS => self.find_segments(ctx, &req.data).await,
            GET_MAP_IDS => self.get_map_ids(ctx, &req.data).await,
            GET_EVIDENCES => self.get_evidences(ctx, &req.data).await,
            ADD_EVIDENCE => self.add_evidence(ctx, &req.data).await,
            PENDING_EVENTS => self.drain_pending_events(&req.data),
            other => {
                return QueryResponse {
                    code: CODE_NOT_IMPLEMENTED,
                    value: Vec::new(),
                    log: format!("unexpected query path: {other}"),
                }
            }
        };
        match value {
            Ok(value) => QueryResponse {
                code: CODE_OK,
                value,
                log: String::new(),
            },
            Err(e) => QueryResponse {
                code: code_for(&e),
                value: Vec::new(),
                log: e.to_string(),
            },
        }
    }

    fn drain_pending_events(&self, data: &[u8]) -> Result<Vec<u8>> {
        let PendingEventsArgs { consumer } = args(data)?;
        to_json(&self.pending_events().drain(&consumer))
    }

    async fn get_segment(&self, ctx: &Context, data: &[u8]) -> Result<Vec<u8>> {
        let link_hash: LinkHash = required(data)?;
        to_json(&self.adapter().get_segment(ctx, &link_hash).await?)
    }

    async fn find_segments(&self, ctx: &Context, data: &[u8]) -> Result<Vec<u8>> {
        let filter: SegmentFilter = args(data)?;
        to_json(&self.adapter().find_segments(ctx, &filter).await?)
    }

    async fn get_map_ids(&self, ctx: &Context, data: &[u8]) -> Result<Vec<u8>> {
        let filter: MapFilter = args(data)?;
        to_json(&self.adapter().get_map_ids(ctx, &filter).await?)
    }

    async fn get_evidences(&self, ctx: &Context, data: &[u8]) -> Result<Vec<u8>> {
        let link_hash: LinkHash = required(data)?;
        to_json(&self.adapter().get_evidences(ctx, &link_hash).await?)
    }

    async fn add_evidence(&self, ctx: &Context, data: &[u8]) -> Result<Vec<u8>> {
        let AddEvidenceArgs { link_hash, evidence } = required(data)?;
        self.adapter().add_evidence(ctx, &link_hash, evidence.clone()).await?;
        self.publish(StoreEvent::saved_evidence(link_hash, evidence)).await;
        to_json(&())
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}
