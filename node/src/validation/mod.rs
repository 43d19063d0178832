// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Link validation and the governance that drives it.
//!
//! # Architecture
//! - `Validator` = one check bound to a `(process, type)` pair
//! - `MultiValidator` = ordered composition, first failure wins
//! - `rules` = the rules document and the validators built from it
//! - `GovernanceManager` = rules file + `_governance` lineage, hot reloaded
//!
//! # Guarantees
//! - Per type, validators run in the order schema, transition, signature/PKI, plugin
//! - A signature check over every signature present always runs last
//! - A published `MultiValidator` is never mutated; reloads swap the whole set

use thiserror::Error;

use crate::errors::ErrorKind;

pub mod governance;
pub mod multi;
pub mod pki;
pub mod plugin;
pub mod rules;
pub mod schema;
pub mod signature;
pub mod transition;
pub mod validator;

pub use governance::{GovernanceManager, ValidatorHandle};
pub use multi::MultiValidator;
pub use pki::PkiValidator;
pub use plugin::{PluginFn, PluginRegistry, PluginValidator};
pub use rules::{build_multi_validator, load_rules, parse_rules, Identity, Pki, ProcessRules, RulesSet, ScriptConfig, TypeMap, TypeRules};
pub use schema::SchemaValidator;
pub use signature::{sign_link, SignatureValidator};
pub use transition::TransitionValidator;
pub use validator::{BaseConfig, Validator};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("link validation failed: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),
    #[error("no transition found {from} --> {to} (allowed: {allowed:?})")]
    TransitionViolation {
        from: String,
        to: String,
        allowed: Vec<String>,
    },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("missing signature: {0}")]
    MissingSignature(String),
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),
    #[error("signature payload is empty: {0}")]
    EmptyPayload(String),
    #[error("Missing signatory for validator {link_type} of process {process}: signature from {required} is required")]
    PkiViolation {
        process: String,
        link_type: String,
        required: String,
    },
    #[error("cannot load plugin: {0}")]
    PluginLoadFailed(String),
    #[error("plugin rejected link: {0}")]
    PluginRejected(String),
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::SchemaViolation(_) => ErrorKind::SchemaViolation,
            ValidationError::TransitionViolation { .. } => ErrorKind::TransitionViolation,
            ValidationError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            ValidationError::MissingSignature(_) => ErrorKind::MissingSignature,
            ValidationError::SignatureInvalid(_) | ValidationError::EmptyPayload(_) => ErrorKind::SignatureInvalid,
            ValidationError::PkiViolation { .. } => ErrorKind::PkiViolation,
            ValidationError::PluginLoadFailed(_) => ErrorKind::PluginLoadFailed,
            ValidationError::PluginRejected(_) => ErrorKind::PluginRejected,
        }
    }

    /// Label used by the validation failure counter.
    pub fn label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::SchemaViolation => "schema",
            ErrorKind::TransitionViolation => "transition",
            ErrorKind::PreconditionFailed => "precondition",
            ErrorKind::MissingSignature => "missing_signature",
            ErrorKind::SignatureInvalid => "signature",
            ErrorKind::PkiViolation => "pki",
            ErrorKind::PluginLoadFailed | ErrorKind::PluginRejected => "plugin",
            _ => "other",
        }
    }
}
