// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Allowed predecessor types.
//!
//! A link of type `T` passes when it is a root and `""` is allowed, or when
//! its predecessor exists and the predecessor's type is allowed.

use async_trait::async_trait;
use popstore_kernel::types::{Hash32, Link};
use serde_json::json;

use super::validator::{config_hash, BaseConfig, Validator};
use super::ValidationError;
use crate::context::Context;
use crate::errors::Result;
use crate::store::SegmentReader;

/// How a missing predecessor is rendered in violation messages.
const ROOT: &str = "()";

pub struct TransitionValidator {
    config: BaseConfig,
    allowed: Vec<String>,
}

impl TransitionValidator {
    pub fn new(config: BaseConfig, allowed: Vec<String>) -> Self {
        TransitionValidator { config, allowed }
    }

    fn check(&self, from: Option<&str>) -> std::result::Result<(), ValidationError> {
        let key = from.unwrap_or("");
        if self.allowed.iter().any(|a| a == key) {
            return Ok(());
        }
        Err(ValidationError::TransitionViolation {
            from: from.unwrap_or(ROOT).to_string(),
            to: self.config.link_type.clone(),
            allowed: self.allowed.clone(),
        })
    }
}

#[async_trait]
impl Validator for TransitionValidator {
    fn should_validate(&self, link: &Link) -> bool {
        self.config.matches(link)
    }

    async fn validate(&self, ctx: &Context, reader: &dyn SegmentReader, link: &Link) -> Result<()> {
        let Some(prev) = &link.meta.prev_link_hash else {
            return Ok(self.check(None)?);
        };
        let Some(segment) = reader.get_segment(ctx, prev).await? else {
            return Err(ValidationError::PreconditionFailed(format!("previous segment not found: {prev}")).into());
        };
        Ok(self.check(Some(&segment.link.meta.link_type))?)
    }

    fn hash(&self) -> Hash32 {
        config_hash(
            "transition",
            &json!({
                "process": self.config.process,
                "type": self.config.link_type,
                "transitions": self.allowed,
            }),
        )
    }
}
