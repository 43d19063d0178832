// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use popstore_kernel::error::KernelError;
use popstore_kernel::types::LinkHash;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::validation::ValidationError;

/// Backend-agnostic error kinds, as exposed to callers and over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    SchemaViolation,
    TransitionViolation,
    PreconditionFailed,
    MissingSignature,
    SignatureInvalid,
    PkiViolation,
    PluginLoadFailed,
    PluginRejected,
    RulesInvalid,
    BackendUnavailable,
    Cancelled,
    InvalidArgument,
    InternalError,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("link is immutable, {0} already exists")]
    AlreadyExists(LinkHash),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid rules: {0}")]
    RulesInvalid(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Validation(v) => v.kind(),
            StoreError::RulesInvalid(_) => ErrorKind::RulesInvalid,
            StoreError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StoreError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT),
            ErrorKind::InternalError | ErrorKind::PluginLoadFailed | ErrorKind::RulesInvalid => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

impl From<KernelError> for StoreError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::Json(inner) => StoreError::Internal(inner.to_string()),
            other => StoreError::InvalidArgument(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Internal(format!("json: {e}"))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::BackendUnavailable(format!("io: {e}"))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::BackendUnavailable(format!("sqlite: {e}"))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::BackendUnavailable(format!("http: {e}"))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Internal(format!("task failed: {e}"))
    }
}
