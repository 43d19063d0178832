// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    /// The link is structurally invalid (missing process, bad priority...).
    #[error("invalid link: {0}")]
    InvalidLink(String),
    /// A fingerprint could not be decoded from its hex form.
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    /// A filter or pagination request is out of bounds.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("merkle tree error: {0}")]
    Merkle(String),
    /// An evidence proof does not verify.
    #[error("invalid proof: {0}")]
    InvalidProof(String),
}

pub type KernelResult<T> = std::result::Result<T, KernelError>;
pub type Result<T> = KernelResult<T>;
