// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Solo block production.
//!
//! Lets a single node run the replicated engine without an external
//! consensus engine: accepted transactions wait in a bounded [`Mempool`] and
//! a [`BlockProducer`] seals them into a block every interval.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use popstore_kernel::block::Header;
use popstore_kernel::types::Hash32;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::abci::SharedEngine;
use crate::context::Context;
use crate::errors::{Result, StoreError};

pub struct Mempool {
    queue: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Mempool {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, tx: Vec<u8>) -> Result<()> {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            return Err(StoreError::BackendUnavailable(format!(
                "mempool is full ({} transactions)",
                self.capacity
            )));
        }
        queue.push_back(tx);
        Ok(())
    }

    pub fn take_all(&self) -> Vec<Vec<u8>> {
        self.lock().drain(..).collect()
    }

    /// Puts transactions of a failed block back at the head of the queue, in
    /// their original order. They were admitted already, so capacity is not
    /// enforced.
    pub fn requeue(&self, txs: Vec<Vec<u8>>) {
        let mut queue = self.lock();
        for tx in txs.into_iter().rev() {
            queue.push_front(tx);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a sealed block contained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSummary {
    pub height: u64,
    pub app_hash: Hash32,
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Clone)]
pub struct BlockProducer {
    engine: SharedEngine,
    mempool: Arc<Mempool>,
    chain_id: String,
}

impl BlockProducer {
    pub fn new(engine: SharedEngine, mempool: Arc<Mempool>, chain_id: impl Into<String>) -> Self {
        BlockProducer {
            engine,
            mempool,
            chain_id: chain_id.into(),
        }
    }

    /// Seals one block, unless there is nothing to do: no transaction waiting
    /// and no evidence owed to the last block.
    pub async fn produce_block(&self, ctx: &Context) -> Result<Option<BlockSummary>> {
        let mut engine = self.engine.lock().await;
        if self.mempool.is_empty() && !engine.last_block().owes_evidences() {
            return Ok(None);
        }

        let last = engine.last_block();
        let header = Header {
            chain_id: self.chain_id.clone(),
            height: last.height + 1,
            time: chrono::Utc::now().timestamp(),
            app_hash: last.app_hash,
        };
        let height = header.height;
        engine.begin_block(ctx, header).await?;

        let mut delivered = Vec::new();
        let mut rejected = 0;
        for tx in self.mempool.take_all() {
            let res = engine.deliver_tx(ctx, &tx).await;
            if res.is_ok() {
                delivered.push(tx);
            } else {
                debug!(height, code = res.code, log = %res.log, "transaction dropped from block");
                rejected += 1;
            }
        }
        let accepted = delivered.len();
        match engine.commit(ctx).await {
            Ok(app_hash) => Ok(Some(BlockSummary {
                height,
                app_hash,
                accepted,
                rejected,
            })),
            Err(e) => {
                warn!(height, requeued = accepted, "block not committed, transactions requeued");
                self.mempool.requeue(delivered);
                Err(e)
            }
        }
    }

    /// Produces blocks every `interval` until `ctx` is cancelled.
    pub fn spawn(self, ctx: Context, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, chain_id = %self.chain_id, "block producer started");
            loop {
                tokio::select! {
                    _ = ctx.token().cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.produce_block(&ctx).await {
                            error!(error = %e, "block production failed");
                        }
                    }
                }
            }
            info!("block producer stopped");
        })
    }
}
