// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Evidences: external attestations attached to a link.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceState {
    Pending,
    Complete,
}

impl EvidenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceState::Pending => "PENDING",
            EvidenceState::Complete => "COMPLETE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub backend: String,
    pub provider: String,
    pub proof: Value,
    pub state: EvidenceState,
}

impl Evidence {
    pub fn new(backend: impl Into<String>, provider: impl Into<String>, proof: Value, state: EvidenceState) -> Self {
        Evidence {
            backend: backend.into(),
            provider: provider.into(),
            proof,
            state,
        }
    }
}

/// Outcome of [`Evidences::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvidenceMerge {
    Inserted,
    /// A pending evidence of the same provider was completed.
    Upgraded,
    /// The provider already had an evidence; nothing changed.
    Ignored,
}

impl EvidenceMerge {
    pub fn changed(&self) -> bool {
        !matches!(self, EvidenceMerge::Ignored)
    }
}

/// The evidences of one link, at most one per provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Evidences(Vec<Evidence>);

impl Evidences {
    pub fn new() -> Self {
        Evidences(Vec::new())
    }

    /// Adds `evidence` unless its provider is already present.
    ///
    /// A `COMPLETE` evidence replaces a `PENDING` one from the same provider.
    pub fn add(&mut self, evidence: Evidence) -> EvidenceMerge {
        match self.0.iter_mut().find(|e| e.provider == evidence.provider) {
            None => {
                self.0.push(evidence);
                EvidenceMerge::Inserted
            }
            Some(existing) => {
                if existing.state == EvidenceState::Pending && evidence.state == EvidenceState::Complete {
                    *existing = evidence;
                    EvidenceMerge::Upgraded
                } else {
                    EvidenceMerge::Ignored
                }
            }
        }
    }

    pub fn get_by_provider(&self, provider: &str) -> Option<&Evidence> {
        self.0.iter().find(|e| e.provider == provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Evidence> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Evidence> {
        self.0
    }
}

impl FromIterator<Evidence> for Evidences {
    fn from_iter<I: IntoIterator<Item = Evidence>>(iter: I) -> Self {
        let mut out = Evidences::new();
        for e in iter {
            out.add(e);
        }
        out
    }
}

impl IntoIterator for Evidences {
    type Item = Evidence;
    type IntoIter = std::vec::IntoIter<Evidence>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
