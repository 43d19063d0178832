// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Replicated engine: a block-driven state machine over an adapter.
//!
//! # Architecture
//! ```text
//! begin_block(header) -> evidences for the previous block, new batch
//! check_tx(tx)        -> validate against committed state
//! deliver_tx(tx)      -> validate against the batch, stage the link
//! commit()            -> merkle root, app hash, batch write, lastBlock, SAVED_LINKS
//! ```
//!
//! # Invariants
//! - `appHash(h) = H(appHash(h-1) || validatorsHash || merkleRoot(links of h))`
//! - Evidences for the links of block `h` are produced at `begin_block(h+1)`,
//!   once the header carrying `appHash(h)` is known
//! - A rejected transaction never panics the engine; it returns a non-zero code

use std::sync::Arc;

use popstore_kernel::types::{Link, LinkHash};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::errors::{ErrorKind, StoreError};

pub mod app;
pub mod query;

pub use app::{EngineConfig, EngineInfo, ReplicatedEngine};
pub use query::{QueryRequest, QueryResponse};

pub type SharedEngine = Arc<Mutex<ReplicatedEngine>>;

pub const CODE_OK: u32 = 0;
pub const CODE_VALIDATION: u32 = 400;
pub const CODE_NOT_FOUND: u32 = 404;
pub const CODE_INTERNAL_ERROR: u32 = 500;
pub const CODE_NOT_IMPLEMENTED: u32 = 501;

/// Engine name reported by `GetInfo`.
pub const NAME: &str = "TMPop";
pub const DESCRIPTION: &str = "Replicated ledger engine with Merkle evidences";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    #[default]
    CreateLink,
}

/// A transaction as carried by consensus: JSON bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    #[serde(rename = "type", default)]
    pub tx_type: TxType,
    pub link: Link,
}

impl Tx {
    pub fn create_link(link: Link) -> Self {
        Tx {
            tx_type: TxType::CreateLink,
            link,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::InvalidArgument(format!("malformed transaction: {e}")))
    }
}

/// Outcome of `check_tx` / `deliver_tx`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResponse {
    pub code: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_hash: Option<LinkHash>,
}

impl TxResponse {
    pub fn ok(link_hash: LinkHash) -> Self {
        TxResponse {
            code: CODE_OK,
            log: String::new(),
            link_hash: Some(link_hash),
        }
    }

    pub fn error(err: &StoreError) -> Self {
        TxResponse {
            code: code_for(err),
            log: err.to_string(),
            link_hash: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Wire code of an error.
pub fn code_for(err: &StoreError) -> u32 {
    match err.kind() {
        ErrorKind::NotFound => CODE_NOT_FOUND,
        ErrorKind::InternalError
        | ErrorKind::BackendUnavailable
        | ErrorKind::Cancelled
        | ErrorKind::RulesInvalid
        | ErrorKind::PluginLoadFailed => CODE_INTERNAL_ERROR,
        _ => CODE_VALIDATION,
    }
}
