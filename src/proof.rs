// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Consensus Evidence Proofs.

use serde::{Deserialize, Serialize};

use crate::block::{compute_app_hash, Header};
use crate::config::EVIDENCE_BACKEND;
use crate::error::{KernelError, Result};
use crate::merkle::{verify_inclusion, MerklePath};
use crate::types::{Evidence, EvidenceState, Hash32, LinkHash};

/// Proof that a link was committed in a given block.
///
/// The proof is self-contained: the next block's header signs the app hash
/// that commits to `root`, and `path` links the link hash to `root`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockProof {
    /// Height of the block that contains the link.
    pub block_height: u64,

    /// Merkle root of the link hashes of that block.
    pub root: Hash32,

    /// Inclusion path from the link hash to `root`.
    pub path: MerklePath,

    /// Hash of the validator set that checked the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validators_hash: Option<Hash32>,

    /// Header of the block itself (carries the previous app hash).
    pub header: Header,

    /// Header of the following block (carries this block's app hash).
    pub next_header: Header,
}

impl BlockProof {
    /// Block time in unix seconds.
    pub fn time(&self) -> i64 {
        self.header.time
    }

    pub fn verify(&self, link_hash: &LinkHash) -> Result<()> {
        if self.header.height != self.block_height {
            return Err(KernelError::InvalidProof(format!(
                "header height {} does not match block height {}",
                self.header.height, self.block_height
            )));
        }
        if self.next_header.height != self.block_height + 1 {
            return Err(KernelError::InvalidProof(format!(
                "next header height {} does not follow block height {}",
                self.next_header.height, self.block_height
            )));
        }

        let expected = compute_app_hash(&self.header.app_hash, self.validators_hash.as_ref(), Some(&self.root));
        if expected != self.next_header.app_hash {
            return Err(KernelError::InvalidProof(format!(
                "app hash mismatch: computed {}, next header has {}",
                expected, self.next_header.app_hash
            )));
        }

        verify_inclusion(link_hash, &self.root, &self.path)
            .map_err(|e| KernelError::InvalidProof(e.to_string()))
    }

    /// Wraps the proof into a complete evidence from `provider` (the chain id).
    pub fn into_evidence(self, provider: impl Into<String>) -> Result<Evidence> {
        Ok(Evidence::new(
            EVIDENCE_BACKEND,
            provider,
            serde_json::to_value(self)?,
            EvidenceState::Complete,
        ))
    }

    pub fn from_evidence(evidence: &Evidence) -> Result<Self> {
        if evidence.backend != EVIDENCE_BACKEND {
            return Err(KernelError::InvalidProof(format!(
                "evidence backend {:?} is not {:?}",
                evidence.backend, EVIDENCE_BACKEND
            )));
        }
        Ok(serde_json::from_value(evidence.proof.clone())?)
    }
}
