// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Block headers and the application hash chain of the replicated engine.
//!
//! # Invariants
//! - `appHash(h) = SHA-256(prevAppHash || validatorsHash || merkleRoot)`
//! - Absent validators hash or merkle root contribute 32 zero bytes
//! - The header of block `h + 1` carries `appHash(h)`

use serde::{Deserialize, Serialize};

use crate::types::{Hash32, LinkHash};

/// Header handed to the engine at the start of each block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub chain_id: String,
    pub height: u64,
    /// Block time, unix seconds. Supplied by consensus.
    #[serde(default)]
    pub time: i64,
    /// Application hash returned by the previous commit.
    #[serde(default)]
    pub app_hash: Hash32,
}

pub fn compute_app_hash(prev_app_hash: &Hash32, validators_hash: Option<&Hash32>, merkle_root: Option<&Hash32>) -> Hash32 {
    let validators = validators_hash.copied().unwrap_or(Hash32::ZERO);
    let root = merkle_root.copied().unwrap_or(Hash32::ZERO);
    Hash32::digest_concat(&[prev_app_hash.as_ref(), validators.as_ref(), root.as_ref()])
}

/// What the engine remembers about its last committed block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastBlock {
    pub height: u64,
    pub app_hash: Hash32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validators_hash: Option<Hash32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<Hash32>,
    /// Sorted hashes of the links committed in the block.
    #[serde(default)]
    pub link_hashes: Vec<LinkHash>,
    /// Header the block was executed under; needed to prove its links later.
    #[serde(default)]
    pub header: Header,
}

impl LastBlock {
    pub fn owes_evidences(&self) -> bool {
        !self.link_hashes.is_empty()
    }
}
