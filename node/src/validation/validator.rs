// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use async_trait::async_trait;
use popstore_kernel::canonical;
use popstore_kernel::types::{Hash32, Link};
use serde::Serialize;
use serde_json::Value;

use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::store::SegmentReader;

/// A single check applied to the links of one `(process, type)` pair.
#[async_trait]
pub trait Validator: Send + Sync {
    fn should_validate(&self, link: &Link) -> bool;

    /// May read prior segments through `reader`, e.g. to resolve `prevLinkHash`.
    async fn validate(&self, ctx: &Context, reader: &dyn SegmentReader, link: &Link) -> Result<()>;

    /// Digest of the validator's configuration.
    fn hash(&self) -> Hash32;
}

/// The `(process, type)` pair a validator is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BaseConfig {
    pub process: String,
    #[serde(rename = "type")]
    pub link_type: String,
}

impl BaseConfig {
    pub fn new(process: impl Into<String>, link_type: impl Into<String>) -> Result<Self> {
        let config = BaseConfig {
            process: process.into(),
            link_type: link_type.into(),
        };
        if config.process.is_empty() {
            return Err(StoreError::RulesInvalid("validator requires a process".into()));
        }
        if config.link_type.is_empty() {
            return Err(StoreError::RulesInvalid("validator requires a link type".into()));
        }
        Ok(config)
    }

    pub fn matches(&self, link: &Link) -> bool {
        link.meta.process == self.process && link.meta.link_type == self.link_type
    }
}

/// Fingerprint of a validator's configuration, already in JSON form.
pub(crate) fn config_hash(kind: &str, config: &Value) -> Hash32 {
    let body = canonical::encode(config);
    Hash32::digest_concat(&[kind.as_bytes(), body.as_slice()])
}
