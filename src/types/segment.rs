// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Segments: the read shape of a stored link.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::types::evidence::Evidences;
use crate::types::hash::LinkHash;
use crate::types::link::{Link, LinkReference};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub link: Link,
    pub meta: SegmentMeta,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMeta {
    pub link_hash: LinkHash,
    #[serde(default)]
    pub evidences: Evidences,
    /// Copy of `link.meta.refs`, kept so readers can follow references
    /// without decoding the link.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<LinkReference>,
}

impl Segment {
    pub fn from_link(link: Link) -> Result<Self> {
        let link_hash = link.hash()?;
        Ok(Self::with_hash(link, link_hash, Evidences::new()))
    }

    /// Builds a segment around a link whose hash is already known.
    pub fn with_hash(link: Link, link_hash: LinkHash, evidences: Evidences) -> Self {
        let refs = link.meta.refs.clone();
        Segment {
            link,
            meta: SegmentMeta {
                link_hash,
                evidences,
                refs,
            },
        }
    }

    pub fn link_hash(&self) -> &LinkHash {
        &self.meta.link_hash
    }

    /// Checks that the stored hash matches the link's fingerprint.
    pub fn check(&self) -> Result<()> {
        self.link.check()?;
        let computed = self.link.hash()?;
        if computed != self.meta.link_hash {
            return Err(KernelError::InvalidLink(format!(
                "linkHash mismatch: segment says {}, link hashes to {}",
                self.meta.link_hash, computed
            )));
        }
        Ok(())
    }
}
