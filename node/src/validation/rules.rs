// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The governance rules document.
//!
//! ```json
//! {
//!   "auction": {
//!     "pki": { "alice": { "keys": ["<base64>"], "roles": ["seller"] } },
//!     "types": {
//!       "init": { "schema": {...}, "signatures": ["seller"], "transitions": [""] },
//!       "bid":  { "transitions": ["init", "bid"], "script": { "file": "bid.so", "type": "go" } }
//!     }
//!   }
//! }
//! ```
//!
//! # Invariants
//! - `types` keep their file order, which is also validator order
//! - Either every type of a process declares `transitions` or none does
//! - Requiring signatures needs a `pki`

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::multi::MultiValidator;
use super::pki::PkiValidator;
use super::plugin::{PluginRegistry, PluginValidator};
use super::schema::SchemaValidator;
use super::signature::SignatureValidator;
use super::transition::TransitionValidator;
use super::validator::{BaseConfig, Validator};
use crate::errors::{Result, StoreError};

/// Rules of every governed process, by process name.
pub type RulesSet = BTreeMap<String, ProcessRules>;

/// Identities by name.
pub type Pki = BTreeMap<String, Identity>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptConfig>,
}

impl TypeRules {
    fn requires_signatures(&self) -> bool {
        self.signatures.as_ref().is_some_and(|s| !s.is_empty())
    }

    fn is_empty(&self) -> bool {
        !self.requires_signatures() && self.schema.is_none() && self.transitions.is_none() && self.script.is_none()
    }
}

/// `types` in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeMap(pub Vec<(String, TypeRules)>);

impl TypeMap {
    pub fn get(&self, link_type: &str) -> Option<&TypeRules> {
        self.0.iter().find(|(name, _)| name == link_type).map(|(_, rules)| rules)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeRules)> {
        self.0.iter().map(|(name, rules)| (name.as_str(), rules))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for TypeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, rules) in &self.0 {
            map.serialize_entry(name, rules)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TypeMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TypeMapVisitor;

        impl<'de> Visitor<'de> for TypeMapVisitor {
            type Value = TypeMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of link types to rules")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<TypeMap, A::Error> {
                let mut types: Vec<(String, TypeRules)> = Vec::new();
                while let Some((name, rules)) = access.next_entry::<String, TypeRules>()? {
                    if types.iter().any(|(n, _)| *n == name) {
                        return Err(serde::de::Error::custom(format!("duplicate link type {name}")));
                    }
                    types.push((name, rules));
                }
                Ok(TypeMap(types))
            }
        }

        deserializer.deserialize_map(TypeMapVisitor)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pki: Option<Pki>,
    pub types: TypeMap,
}

impl ProcessRules {
    /// Structural checks that do not depend on building the validators.
    pub fn check(&self, process: &str) -> Result<()> {
        let invalid = |msg: String| Err(StoreError::RulesInvalid(format!("process {process}: {msg}")));

        if let Some(pki) = &self.pki {
            for (name, identity) in pki {
                for key in &identity.keys {
                    if key.is_empty() || STANDARD.decode(key).is_err() {
                        return invalid(format!("public key of {name} must be a non empty base64 string"));
                    }
                }
            }
        }

        let mut missing_transitions = Vec::new();
        for (link_type, rules) in self.types.iter() {
            if link_type.is_empty() {
                return invalid("link types must be non empty".into());
            }
            if rules.is_empty() {
                return invalid(format!(
                    "type {link_type} needs a schema, signatures, transitions or a script"
                ));
            }
            if rules.requires_signatures() && self.pki.is_none() {
                return invalid(format!("type {link_type} requires signatures but no pki is defined"));
            }
            if rules.transitions.is_none() {
                missing_transitions.push(link_type);
            }
        }
        if !missing_transitions.is_empty() && missing_transitions.len() != self.types.len() {
            return invalid(format!("missing transitions for types {missing_transitions:?}"));
        }
        Ok(())
    }

    /// Builds this process' validators, type by type, in file order.
    pub fn validators(&self, process: &str, registry: &PluginRegistry) -> Result<Vec<Arc<dyn Validator>>> {
        self.check(process)?;
        let pki = Arc::new(self.pki.clone().unwrap_or_default());
        let mut out: Vec<Arc<dyn Validator>> = Vec::new();

        for (link_type, rules) in self.types.iter() {
            let base = BaseConfig::new(process, link_type)?;
            if let Some(schema) = &rules.schema {
                out.push(Arc::new(SchemaValidator::new(base.clone(), schema.clone())?));
            }
            if let Some(transitions) = &rules.transitions {
                out.push(Arc::new(TransitionValidator::new(base.clone(), transitions.clone())));
            }
            if let Some(required) = rules.signatures.as_ref().filter(|s| !s.is_empty()) {
                out.push(Arc::new(SignatureValidator::required(base.clone())));
                out.push(Arc::new(PkiValidator::new(base.clone(), required.clone(), pki.clone())));
            }
            if let Some(script) = &rules.script {
                out.push(Arc::new(PluginValidator::load(base, script.clone(), registry)?));
            }
        }
        Ok(out)
    }

    /// The `state` of this process' governance links.
    pub fn to_state(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_state(state: &Value) -> Result<Self> {
        serde_json::from_value(state.clone())
            .map_err(|e| StoreError::RulesInvalid(format!("governance link is badly formatted: {e}")))
    }
}

pub fn parse_rules(data: &[u8]) -> Result<RulesSet> {
    let rules: RulesSet =
        serde_json::from_slice(data).map_err(|e| StoreError::RulesInvalid(format!("cannot parse rules: {e}")))?;
    for (process, process_rules) in &rules {
        if process.is_empty() {
            return Err(StoreError::RulesInvalid("process names must be non empty".into()));
        }
        process_rules.check(process)?;
    }
    Ok(rules)
}

pub async fn load_rules(path: &Path) -> Result<RulesSet> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::RulesInvalid(format!("cannot read {}: {e}", path.display())))?;
    parse_rules(&data)
}

/// One validator set for every process of `rules`.
pub fn build_multi_validator(rules: &RulesSet, registry: &PluginRegistry) -> Result<MultiValidator> {
    let mut validators = Vec::new();
    for (process, process_rules) in rules {
        validators.extend(process_rules.validators(process, registry)?);
    }
    Ok(MultiValidator::new(validators))
}
