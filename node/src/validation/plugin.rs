// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Compiled-in validation plugins.
//!
//! Rules reference a plugin through `script: {file, type}`. Instead of opening
//! `file` as a shared library, the node looks the check up in a
//! [`PluginRegistry`] keyed by `(process, type)`, filled at startup by the
//! embedding binary. `file` is kept as part of the validator's identity.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use popstore_kernel::types::{Hash32, Link};
use rustc_hash::FxHashMap;
use serde_json::json;

use super::rules::ScriptConfig;
use super::validator::{config_hash, BaseConfig, Validator};
use super::ValidationError;
use crate::context::Context;
use crate::errors::Result;
use crate::store::SegmentReader;

/// Script types accepted in rules files.
pub const SCRIPT_TYPES: [&str; 2] = ["go", "native"];

/// A custom check. `Err` carries the rejection reason.
pub type PluginFn = Arc<dyn Fn(&Link) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Arc<RwLock<FxHashMap<(String, String), PluginFn>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, process: &str, link_type: &str, check: F)
    where
        F: Fn(&Link) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        plugins.insert((process.to_string(), link_type.to_string()), Arc::new(check));
    }

    pub fn get(&self, process: &str, link_type: &str) -> Option<PluginFn> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        plugins.get(&(process.to_string(), link_type.to_string())).cloned()
    }
}

pub struct PluginValidator {
    config: BaseConfig,
    script: ScriptConfig,
    check: PluginFn,
}

impl PluginValidator {
    pub fn load(config: BaseConfig, script: ScriptConfig, registry: &PluginRegistry) -> std::result::Result<Self, ValidationError> {
        if !SCRIPT_TYPES.contains(&script.kind.as_str()) {
            return Err(ValidationError::PluginLoadFailed(format!(
                "script type {:?} is not handled, valid types are {:?}",
                script.kind, SCRIPT_TYPES
            )));
        }
        let check = registry.get(&config.process, &config.link_type).ok_or_else(|| {
            ValidationError::PluginLoadFailed(format!(
                "no plugin registered for process {} and type {} (script {})",
                config.process, config.link_type, script.file
            ))
        })?;
        Ok(PluginValidator { config, script, check })
    }
}

#[async_trait]
impl Validator for PluginValidator {
    fn should_validate(&self, link: &Link) -> bool {
        self.config.matches(link)
    }

    async fn validate(&self, _ctx: &Context, _reader: &dyn SegmentReader, link: &Link) -> Result<()> {
        (self.check)(link).map_err(|reason| ValidationError::PluginRejected(reason).into())
    }

    fn hash(&self) -> Hash32 {
        config_hash(
            "plugin",
            &json!({
                "process": self.config.process,
                "type": self.config.link_type,
                "script": self.script,
            }),
        )
    }
}
