// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Store events.
//!
//! Emitted after a write is persisted. Each event carries the full change
//! set, so subscribers never need to query the store back.
//!
//! # Wire form
//! `{"eventType": "SAVED_LINKS", "data": [link, ...]}` or
//! `{"eventType": "SAVED_EVIDENCES", "data": {"<linkHash>": evidence, ...}}`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Evidence, Link, LinkHash};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreEvent {
    SavedLinks(Vec<Link>),
    SavedEvidences(BTreeMap<LinkHash, Evidence>),
}

impl StoreEvent {
    pub fn saved_links(links: Vec<Link>) -> Self {
        StoreEvent::SavedLinks(links)
    }

    pub fn saved_link(link: Link) -> Self {
        StoreEvent::SavedLinks(vec![link])
    }

    pub fn saved_evidence(link_hash: LinkHash, evidence: Evidence) -> Self {
        let mut map = BTreeMap::new();
        map.insert(link_hash, evidence);
        StoreEvent::SavedEvidences(map)
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            StoreEvent::SavedLinks(_) => "SAVED_LINKS",
            StoreEvent::SavedEvidences(_) => "SAVED_EVIDENCES",
        }
    }

    /// Number of links or evidences carried.
    pub fn len(&self) -> usize {
        match self {
            StoreEvent::SavedLinks(l) => l.len(),
            StoreEvent::SavedEvidences(e) => e.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
