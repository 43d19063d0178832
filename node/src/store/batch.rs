// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Buffered batch: an op log in front of an adapter.
//!
//! # Invariants
//! - Reads see the batch's own pending writes first (latest op wins), then
//!   fall back to the wrapped adapter
//! - `find_segments` and `get_map_ids` ignore pending writes
//! - `write` replays link ops, then value ops, in insertion order. On a
//!   non-transactional adapter a failure can leave a prefix applied, but a
//!   value staged next to links is never stored without them

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use popstore_kernel::filter::{MapFilter, SegmentFilter};
use popstore_kernel::types::{Evidences, Link, LinkHash, Segment};

use super::{prepare_link, Adapter, Batch, KeyValueReader, KeyValueWriter, LinkWriter, SegmentReader};
use crate::context::Context;
use crate::errors::{Result, StoreError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl ValueOp {
    pub fn key(&self) -> &[u8] {
        match self {
            ValueOp::Set { key, .. } | ValueOp::Delete { key } => key,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LinkOp {
    pub link_hash: LinkHash,
    pub link: Link,
}

pub struct BufferedBatch<A: ?Sized> {
    adapter: Arc<A>,
    value_ops: Mutex<Vec<ValueOp>>,
    link_ops: Mutex<Vec<LinkOp>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<A: Adapter + ?Sized> BufferedBatch<A> {
    pub fn new(adapter: Arc<A>) -> Self {
        BufferedBatch {
            adapter,
            value_ops: Mutex::new(Vec::new()),
            link_ops: Mutex::new(Vec::new()),
        }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Links staged so far, in creation order.
    pub fn pending_links(&self) -> Vec<Link> {
        lock(&self.link_ops).iter().map(|op| op.link.clone()).collect()
    }

    pub fn value_ops(&self) -> Vec<ValueOp> {
        lock(&self.value_ops).clone()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.value_ops).is_empty() && lock(&self.link_ops).is_empty()
    }

    /// Removes and returns every staged op.
    pub fn take_ops(&mut self) -> (Vec<ValueOp>, Vec<LinkOp>) {
        let values = std::mem::take(self.value_ops.get_mut().unwrap_or_else(|e| e.into_inner()));
        let links = std::mem::take(self.link_ops.get_mut().unwrap_or_else(|e| e.into_inner()));
        (values, links)
    }

    fn pending_link(&self, link_hash: &LinkHash) -> Option<Link> {
        lock(&self.link_ops)
            .iter()
            .rev()
            .find(|op| op.link_hash == *link_hash)
            .map(|op| op.link.clone())
    }

    /// `Some(Some(v))` pending set, `Some(None)` pending delete, `None` untouched.
    fn pending_value(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        lock(&self.value_ops).iter().rev().find(|op| op.key() == key).map(|op| match op {
            ValueOp::Set { value, .. } => Some(value.clone()),
            ValueOp::Delete { .. } => None,
        })
    }
}

#[async_trait]
impl<A: Adapter + ?Sized + 'static> SegmentReader for BufferedBatch<A> {
    async fn get_segment(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Segment>> {
        if let Some(link) = self.pending_link(link_hash) {
            return Ok(Some(Segment::with_hash(link, *link_hash, Evidences::new())));
        }
        self.adapter.get_segment(ctx, link_hash).await
    }

    async fn find_segments(&self, ctx: &Context, filter: &SegmentFilter) -> Result<Vec<Segment>> {
        self.adapter.find_segments(ctx, filter).await
    }

    async fn get_map_ids(&self, ctx: &Context, filter: &MapFilter) -> Result<Vec<String>> {
        self.adapter.get_map_ids(ctx, filter).await
    }
}

#[async_trait]
impl<A: Adapter + ?Sized + 'static> LinkWriter for BufferedBatch<A> {
    async fn create_link(&self, ctx: &Context, link: Link) -> Result<LinkHash> {
        let link_hash = prepare_link(&link)?;
        if self.pending_link(&link_hash).is_some() || self.adapter.get_segment(ctx, &link_hash).await?.is_some() {
            return Err(StoreError::AlreadyExists(link_hash));
        }
        lock(&self.link_ops).push(LinkOp { link_hash, link });
        Ok(link_hash)
    }
}

#[async_trait]
impl<A: Adapter + ?Sized + 'static> KeyValueReader for BufferedBatch<A> {
    async fn get_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.pending_value(key) {
            Some(pending) => Ok(pending),
            None => self.adapter.get_value(ctx, key).await,
        }
    }
}

#[async_trait]
impl<A: Adapter + ?Sized + 'static> KeyValueWriter for BufferedBatch<A> {
    async fn set_value(&self, _ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        lock(&self.value_ops).push(ValueOp::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn delete_value(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let previous = self.get_value(ctx, key).await?;
        lock(&self.value_ops).push(ValueOp::Delete { key: key.to_vec() });
        Ok(previous)
    }
}

#[async_trait]
impl<A: Adapter + ?Sized + 'static> Batch for BufferedBatch<A> {
    async fn delete_link(&self, ctx: &Context, link_hash: &LinkHash) -> Result<Option<Link>> {
        let removed = {
            let mut ops = lock(&self.link_ops);
            let position = ops.iter().position(|op| op.link_hash == *link_hash);
            position.map(|i| ops.remove(i).link)
        };
        if removed.is_some() {
            return Ok(removed);
        }
        if self.adapter.get_segment(ctx, link_hash).await?.is_some() {
            return Err(StoreError::InvalidArgument(format!(
                "link {link_hash} is already stored and cannot be deleted"
            )));
        }
        Ok(None)
    }

    async fn write(&mut self, ctx: &Context) -> Result<()> {
        let (values, links) = self.take_ops();
        tracing::debug!(values = values.len(), links = links.len(), "writing buffered batch");

        for op in links {
            self.adapter.create_link(ctx, op.link).await?;
        }
        for op in values {
            match op {
                ValueOp::Set { key, value } => self.adapter.set_value(ctx, &key, &value).await?,
                ValueOp::Delete { key } => {
                    self.adapter.delete_value(ctx, &key).await?;
                }
            }
        }

        metrics::counter!("popstore_batch_writes_total", 1);
        Ok(())
    }

    fn as_reader(&self) -> &dyn SegmentReader {
        self
    }
}
