// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Governance: versioned validation rules.
//!
//! # Architecture
//! The rules of each process are recorded as a lineage of links in the
//! reserved `_governance` process, tagged `[process, "validators"]`. One map
//! per process; each new version points to the previous one and has
//! `priority = previous + 1`, so the latest version sorts first.
//!
//! A reload parses the rules file, appends a new version for every process
//! whose rules differ from the stored latest, rebuilds the full validator set
//! (file rules plus processes only known from the ledger) and publishes it on
//! a single-slot `watch` channel.
//!
//! # Guarantees
//! - A failed reload publishes nothing: the previous validator set stays active
//! - Unchanged rules never produce a new governance link
//! - Consumers pull updates without blocking ([`ValidatorHandle::update_validators`])

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};
use popstore_kernel::canonical;
use popstore_kernel::config::{GOVERNANCE_PROCESS, MAX_LIMIT, VALIDATORS_TAG};
use popstore_kernel::filter::SegmentFilter;
use popstore_kernel::types::{Link, LinkHash, Segment};
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::multi::MultiValidator;
use super::plugin::PluginRegistry;
use super::rules::{build_multi_validator, load_rules, ProcessRules, RulesSet};
use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::store::{Adapter, LinkWriter, SegmentReader};

pub const INIT_TYPE: &str = "init";
pub const UPDATE_TYPE: &str = "update";

/// Editors often write a file in several steps; events closer than this
/// collapse into one reload.
const DEBOUNCE: Duration = Duration::from_millis(50);

pub struct GovernanceManager {
    adapter: Arc<dyn Adapter>,
    rules_path: Option<PathBuf>,
    registry: PluginRegistry,
    current: watch::Sender<Arc<MultiValidator>>,
    reload_lock: Mutex<()>,
}

/// A consumer's view of the published validator set.
pub struct ValidatorHandle {
    rx: watch::Receiver<Arc<MultiValidator>>,
}

impl ValidatorHandle {
    pub fn current(&self) -> Arc<MultiValidator> {
        self.rx.borrow().clone()
    }

    /// Replaces `current` when a newer set was published since the last call.
    pub fn update_validators(&mut self, current: &mut Arc<MultiValidator>) -> bool {
        match self.rx.has_changed() {
            Ok(true) => {
                *current = self.rx.borrow_and_update().clone();
                true
            }
            _ => false,
        }
    }
}

impl GovernanceManager {
    /// Loads the rules and publishes the first validator set.
    ///
    /// Without a rules file, only the processes found in the ledger are governed.
    pub async fn new(
        ctx: &Context,
        adapter: Arc<dyn Adapter>,
        rules_path: Option<PathBuf>,
        registry: PluginRegistry,
    ) -> Result<Arc<Self>> {
        let (current, _) = watch::channel(Arc::new(MultiValidator::default()));
        let manager = Arc::new(GovernanceManager {
            adapter,
            rules_path,
            registry,
            current,
            reload_lock: Mutex::new(()),
        });
        manager.reload(ctx).await?;
        Ok(manager)
    }

    pub fn rules_path(&self) -> Option<&Path> {
        self.rules_path.as_deref()
    }

    pub fn current(&self) -> Arc<MultiValidator> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> ValidatorHandle {
        ValidatorHandle {
            rx: self.current.subscribe(),
        }
    }

    /// Re-reads the rules file, records changed rules and publishes a new set.
    pub async fn reload(&self, ctx: &Context) -> Result<Arc<MultiValidator>> {
        let _guard = self.reload_lock.lock().await;
        match self.load(ctx).await {
            Ok(validator) => {
                metrics::counter!("popstore_governance_reloads_total", 1, "result" => "ok");
                self.current.send_replace(validator.clone());
                info!(validators = validator.len(), "validation rules loaded");
                Ok(validator)
            }
            Err(e) => {
                metrics::counter!("popstore_governance_reloads_total", 1, "result" => "error");
                warn!(error = %e, "cannot load validation rules, keeping previous validators");
                Err(e)
            }
        }
    }

    async fn load(&self, ctx: &Context) -> Result<Arc<MultiValidator>> {
        let mut rules = match &self.rules_path {
            Some(path) => load_rules(path).await?,
            None => RulesSet::new(),
        };
        // Refuse rules that cannot be enforced before recording them.
        build_multi_validator(&rules, &self.registry)?;

        for (process, process_rules) in &rules {
            self.reconcile(ctx, process, process_rules).await?;
        }

        for process in self.list_processes(ctx).await? {
            if rules.contains_key(&process) {
                continue;
            }
            let Some(stored) = self.process_rules(ctx, &process).await? else {
                continue;
            };
            match stored.validators(&process, &self.registry) {
                Ok(_) => {
                    rules.insert(process, stored);
                }
                Err(e) => warn!(process = %process, error = %e, "skipping stored rules"),
            }
        }

        Ok(Arc::new(build_multi_validator(&rules, &self.registry)?))
    }

    /// Appends a governance link when `rules` differ from the latest stored version.
    pub async fn reconcile(&self, ctx: &Context, process: &str, rules: &ProcessRules) -> Result<Option<LinkHash>> {
        let state = rules.to_state()?;
        let link = match self.latest(ctx, process).await? {
            Some(previous) if canonical::equal(&previous.link.state, &state) => {
                debug!(process, "validation rules unchanged");
                return Ok(None);
            }
            Some(previous) => Link::new(GOVERNANCE_PROCESS, previous.link.meta.map_id.clone(), UPDATE_TYPE)
                .with_prev(previous.meta.link_hash)
                .with_priority(previous.link.meta.priority.unwrap_or(0.0) + 1.0),
            None => Link::new(GOVERNANCE_PROCESS, uuid::Uuid::new_v4().to_string(), INIT_TYPE).with_priority(0.0),
        };
        let mut link = link.with_state(state).with_tags([process, VALIDATORS_TAG]);
        link.meta.data = Some(json!({ "process": process }));

        match self.adapter.create_link(ctx, link).await {
            Ok(link_hash) => {
                info!(process, link_hash = %link_hash, "new validation rules recorded");
                Ok(Some(link_hash))
            }
            Err(StoreError::AlreadyExists(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Latest governance link of `process`.
    pub async fn latest(&self, ctx: &Context, process: &str) -> Result<Option<Segment>> {
        let filter = SegmentFilter::default()
            .with_process(GOVERNANCE_PROCESS)
            .with_tags([process, VALIDATORS_TAG])
            .with_pagination(0, 1);
        Ok(self.adapter.find_segments(ctx, &filter).await?.into_iter().next())
    }

    /// Processes with at least one governance link, sorted.
    pub async fn list_processes(&self, ctx: &Context) -> Result<Vec<String>> {
        let mut processes = BTreeSet::new();
        let mut offset = 0;
        loop {
            let filter = SegmentFilter::default()
                .with_process(GOVERNANCE_PROCESS)
                .with_tags([VALIDATORS_TAG])
                .with_pagination(offset, MAX_LIMIT);
            let page = self.adapter.find_segments(ctx, &filter).await?;
            for segment in &page {
                processes.extend(segment.link.meta.tags.iter().filter(|t| *t != VALIDATORS_TAG).cloned());
            }
            if page.len() < MAX_LIMIT {
                break;
            }
            offset += MAX_LIMIT;
        }
        Ok(processes.into_iter().collect())
    }

    /// Latest recorded rules of `process`.
    pub async fn process_rules(&self, ctx: &Context, process: &str) -> Result<Option<ProcessRules>> {
        match self.latest(ctx, process).await? {
            Some(segment) => Ok(Some(ProcessRules::from_state(&segment.link.state)?)),
            None => Ok(None),
        }
    }

    /// Reloads whenever the rules file changes, until `ctx` is cancelled.
    pub fn watch(self: &Arc<Self>, ctx: Context) -> Result<JoinHandle<()>> {
        let path = self
            .rules_path
            .clone()
            .ok_or_else(|| StoreError::InvalidArgument("no rules file to watch".into()))?;
        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| StoreError::InvalidArgument(format!("{} is not a file", path.display())))?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, mut rx) = mpsc::channel::<()>(1);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) if is_rules_change(&event, &file_name) => {
                let _ = tx.try_send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "rules watcher error"),
        })
        .map_err(|e| StoreError::Internal(format!("cannot create rules watcher: {e}")))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| StoreError::Internal(format!("cannot watch {}: {e}", dir.display())))?;
        info!(path = %path.display(), "watching validation rules");

        let manager = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = ctx.token().cancelled() => break,
                    msg = rx.recv() => {
                        if msg.is_none() {
                            break;
                        }
                        tokio::time::sleep(DEBOUNCE).await;
                        while rx.try_recv().is_ok() {}
                        // Failures are logged by `reload`.
                        let _ = manager.reload(&ctx).await;
                    }
                }
            }
            debug!("rules watcher stopped");
        }))
    }
}

fn is_rules_change(event: &notify::Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str()))
}
