// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! JSON-schema checks on `link.state`.

use async_trait::async_trait;
use popstore_kernel::types::{Hash32, Link};
use serde_json::{json, Value};

use super::validator::{config_hash, BaseConfig, Validator};
use super::ValidationError;
use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::store::SegmentReader;

pub struct SchemaValidator {
    config: BaseConfig,
    schema: Value,
    compiled: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new(config: BaseConfig, schema: Value) -> Result<Self> {
        let compiled = jsonschema::options().build(&schema).map_err(|e| {
            StoreError::RulesInvalid(format!(
                "invalid schema for {}/{}: {e}",
                config.process, config.link_type
            ))
        })?;
        Ok(SchemaValidator {
            config,
            schema,
            compiled,
        })
    }

    /// Every violation, as `$<instance path>: <message>`.
    fn violations(&self, state: &Value) -> Vec<String> {
        self.compiled
            .iter_errors(state)
            .map(|error| format!("${}: {}", error.instance_path(), error))
            .collect()
    }
}

#[async_trait]
impl Validator for SchemaValidator {
    fn should_validate(&self, link: &Link) -> bool {
        self.config.matches(link)
    }

    async fn validate(&self, _ctx: &Context, _reader: &dyn SegmentReader, link: &Link) -> Result<()> {
        let violations = self.violations(&link.state);
        if violations.is_empty() {
            return Ok(());
        }
        Err(ValidationError::SchemaViolation(violations).into())
    }

    fn hash(&self) -> Hash32 {
        config_hash(
            "schema",
            &json!({
                "process": self.config.process,
                "type": self.config.link_type,
                "schema": self.schema,
            }),
        )
    }
}
