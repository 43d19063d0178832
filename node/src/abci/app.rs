// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use popstore_kernel::block::{compute_app_hash, Header, LastBlock};
use popstore_kernel::canonical;
use popstore_kernel::config::LAST_BLOCK_KEY;
use popstore_kernel::event::StoreEvent;
use popstore_kernel::merkle::{self, StaticTree};
use popstore_kernel::proof::BlockProof;
use popstore_kernel::types::{Evidence, Hash32, Link, LinkHash};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{TxResponse, Tx, DESCRIPTION, NAME};
use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::events::{EventBus, PendingEvents};
use crate::store::{
    Adapter, Batch, EvidenceWriter, KeyValueReader, KeyValueWriter, LinkWriter, SegmentReader,
};
use crate::validation::{MultiValidator, Validator, ValidatorHandle};

#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub version: String,
    pub commit: String,
}

/// Handshake information.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub commit: String,
    pub last_block_height: u64,
    pub last_block_app_hash: Hash32,
}

/// State of the block being executed.
struct OpenBlock {
    header: Header,
    batch: Box<dyn Batch>,
    links: Vec<(LinkHash, Link)>,
}

pub struct ReplicatedEngine {
    adapter: Arc<dyn Adapter>,
    config: EngineConfig,
    validator: Arc<MultiValidator>,
    updates: Option<ValidatorHandle>,
    last_block: LastBlock,
    block: Option<OpenBlock>,
    events: EventBus,
    pending: Arc<PendingEvents>,
}

impl ReplicatedEngine {
    /// Opens the engine, resuming after the last committed block if any.
    pub async fn new(ctx: &Context, adapter: Arc<dyn Adapter>, config: EngineConfig) -> Result<Self> {
        let last_block = match adapter.get_value(ctx, LAST_BLOCK_KEY.as_bytes()).await? {
            Some(bytes) => serde_json::from_slice::<LastBlock>(&bytes)
                .map_err(|e| StoreError::Internal(format!("corrupted {LAST_BLOCK_KEY}: {e}")))?,
            None => LastBlock::default(),
        };
        if last_block.height > 0 {
            info!(height = last_block.height, app_hash = %last_block.app_hash, "resuming replicated engine");
        } else {
            debug!("no committed block, starting from genesis");
        }
        Ok(ReplicatedEngine {
            adapter,
            config,
            validator: Arc::new(MultiValidator::default()),
            updates: None,
            last_block,
            block: None,
            events: EventBus::new(),
            pending: Arc::new(PendingEvents::default()),
        })
    }

    /// Follows the validator sets published by governance.
    pub fn with_validators(mut self, handle: ValidatorHandle) -> Self {
        self.validator = handle.current();
        self.updates = Some(handle);
        self
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn last_block(&self) -> &LastBlock {
        &self.last_block
    }

    pub fn pending_events(&self) -> &Arc<PendingEvents> {
        &self.pending
    }

    pub fn add_store_event_channel(&self, tx: mpsc::Sender<StoreEvent>) {
        self.events.add_channel(tx);
    }

    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            name: NAME.to_string(),
            description: DESCRIPTION.to_string(),
            version: self.config.version.clone(),
            commit: self.config.commit.clone(),
            last_block_height: self.last_block.height,
            last_block_app_hash: self.last_block.app_hash,
        }
    }

    /// Hash of the validator set blocks are executed under.
    pub fn validators_hash(&self) -> Hash32 {
        self.validator.hash()
    }

    pub async fn begin_block(&mut self, ctx: &Context, header: Header) -> Result<()> {
        if self.block.is_some() {
            return Err(StoreError::InvalidArgument("a block is already open".into()));
        }
        if header.height != self.last_block.height + 1 {
            warn!(
                height = header.height,
                last_height = self.last_block.height,
                "unexpected block height"
            );
        }

        if let Some(updates) = self.updates.as_mut() {
            if updates.update_validators(&mut self.validator) {
                info!(height = header.height, "validators updated");
            }
        }

        if self.last_block.owes_evidences() {
            if header.app_hash == self.last_block.app_hash {
                self.add_block_evidences(ctx, &header).await?;
            } else {
                warn!(
                    got = %header.app_hash,
                    expected = %self.last_block.app_hash,
                    "unexpected app hash in header, skipping evidences"
                );
            }
        }

        let batch = self.adapter.new_batch(ctx).await?;
        self.block = Some(OpenBlock {
            header,
            batch,
            links: Vec::new(),
        });
        Ok(())
    }

    /// Attaches a proof to every link of the last block, now that `next`
    /// signs its app hash.
    async fn add_block_evidences(&self, ctx: &Context, next: &Header) -> Result<()> {
        let last = &self.last_block;
        let root = last
            .merkle_root
            .ok_or_else(|| StoreError::Internal(format!("block {} has links but no merkle root", last.height)))?;
        let tree = StaticTree::new(&last.link_hashes)?;
        let provider = last.header.chain_id.clone();

        let mut evidences: BTreeMap<LinkHash, Evidence> = BTreeMap::new();
        for (index, link_hash) in last.link_hashes.iter().enumerate() {
            let proof = BlockProof {
                block_height: last.height,
                root,
                path: tree.path(index)?,
                validators_hash: last.validators_hash,
                header: last.header.clone(),
                next_header: next.clone(),
            };
            let evidence = proof.into_evidence(provider.clone())?;
            self.adapter.add_evidence(ctx, link_hash, evidence.clone()).await?;
            evidences.insert(*link_hash, evidence);
        }
        debug!(height = last.height, count = evidences.len(), "block evidences added");
        self.publish(StoreEvent::SavedEvidences(evidences)).await;
        Ok(())
    }

    /// Validates a transaction against committed state, without staging it.
    pub async fn check_tx(&self, ctx: &Context, tx: &[u8]) -> TxResponse {
        match self.check(ctx, tx).await {
            Ok(link_hash) => TxResponse::ok(link_hash),
            Err(e) => self.reject("check", &e),
        }
    }

    async fn check(&self, ctx: &Context, tx: &[u8]) -> Result<LinkHash> {
        let link = Tx::from_bytes(tx)?.link;
        link.check()?;
        let link_hash = link.hash()?;
        if self.adapter.get_segment(ctx, &link_hash).await?.is_some() {
            return Err(StoreError::AlreadyExists(link_hash));
        }
        // Governance may have moved on since the block began.
        let validator = self.updates.as_ref().map_or_else(|| self.validator.clone(), |u| u.current());
        validator.validate(ctx, self.adapter.as_reader(), &link).await?;
        Ok(link_hash)
    }

    /// Validates a transaction against the block being built and stages it.
    pub async fn deliver_tx(&mut self, ctx: &Context, tx: &[u8]) -> TxResponse {
        match self.deliver(ctx, tx).await {
            Ok(link_hash) => TxResponse::ok(link_hash),
            Err(e) => self.reject("deliver", &e),
        }
    }

    async fn deliver(&mut self, ctx: &Context, tx: &[u8]) -> Result<LinkHash> {
        let validator = self.validator.clone();
        let block = self
            .block
            .as_mut()
            .ok_or_else(|| StoreError::InvalidArgument("deliver_tx outside of a block".into()))?;
        let link = Tx::from_bytes(tx)?.link;
        link.check()?;
        validator.validate(ctx, block.batch.as_reader(), &link).await?;
        let link_hash = block.batch.create_link(ctx, link.clone()).await?;
        block.links.push((link_hash, link));
        Ok(link_hash)
    }

    fn reject(&self, phase: &'static str, err: &StoreError) -> TxResponse {
        debug!(phase, error = %err, "transaction rejected");
        metrics::counter!("popstore_txs_rejected_total", 1, "phase" => phase);
        TxResponse::error(err)
    }

    /// Persists the block and returns its app hash.
    pub async fn commit(&mut self, ctx: &Context) -> Result<Hash32> {
        let started = Instant::now();
        let OpenBlock {
            header,
            mut batch,
            links,
        } = self
            .block
            .take()
            .ok_or_else(|| StoreError::InvalidArgument("commit outside of a block".into()))?;

        let mut link_hashes: Vec<LinkHash> = links.iter().map(|(h, _)| *h).collect();
        link_hashes.sort();
        let merkle_root = merkle::root_of(&link_hashes);
        let validators_hash = self.validator.hash();
        let app_hash = compute_app_hash(&self.last_block.app_hash, Some(&validators_hash), merkle_root.as_ref());

        let last_block = LastBlock {
            height: header.height,
            app_hash,
            validators_hash: Some(validators_hash),
            merkle_root,
            link_hashes,
            header,
        };
        // The block's links and its lastBlock record land in one write.
        let encoded = canonical::to_vec(&last_block)?;
        batch.set_value(ctx, LAST_BLOCK_KEY.as_bytes(), &encoded).await?;
        if let Err(e) = batch.write(ctx).await {
            warn!(height = last_block.height, error = %e, "block commit failed");
            return Err(e);
        }
        self.last_block = last_block;

        let count = links.len();
        if count > 0 {
            self.publish(StoreEvent::saved_links(links.into_iter().map(|(_, l)| l).collect()))
                .await;
        }

        metrics::counter!("popstore_blocks_committed_total", 1);
        metrics::histogram!("popstore_block_commit_duration_seconds", started.elapsed().as_secs_f64());
        metrics::gauge!("popstore_last_block_height", self.last_block.height as f64);
        info!(height = self.last_block.height, links = count, app_hash = %app_hash, "block committed");
        Ok(app_hash)
    }

    /// Records an event for `PendingEvents` and fans it out.
    pub(crate) async fn publish(&self, event: StoreEvent) {
        self.pending.push(event.clone());
        self.events.emit(event).await;
    }
}
