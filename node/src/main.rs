// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use popstore_node::abci::{EngineConfig, ReplicatedEngine, SharedEngine};
use popstore_node::config::{BackendKind, NodeConfig};
use popstore_node::context::Context;
use popstore_node::producer::{BlockProducer, Mempool};
use popstore_node::server::{build_router, AppState};
use popstore_node::store::open_backend;
use popstore_node::telemetry::init_telemetry;
use popstore_node::validation::{GovernanceManager, PluginRegistry};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "popstore-node", version, about = "Process-aware ledger store node")]
struct Args {
    #[arg(long, env = "POPSTORE_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
    #[arg(long, env = "POPSTORE_BACKEND", default_value = "memory")]
    backend: BackendKind,
    #[arg(long, env = "POPSTORE_FILE_PATH", default_value = "data/segments")]
    file_path: PathBuf,
    #[arg(long, env = "POPSTORE_SQLITE_PATH", default_value = "data/popstore.db")]
    sqlite_path: PathBuf,
    #[arg(long, env = "POPSTORE_COUCH_URL", default_value = "http://localhost:5984")]
    couch_url: String,
    #[arg(long, env = "POPSTORE_ELASTIC_URL", default_value = "http://localhost:9200")]
    elastic_url: String,
    #[arg(long, env = "POPSTORE_CREATE_INDEXES", default_value_t = true, action = clap::ArgAction::Set)]
    create_indexes: bool,
    /// Governance rules file, watched for changes.
    #[arg(long, env = "POPSTORE_RULES")]
    rules: Option<PathBuf>,
    #[arg(long, env = "POPSTORE_CHAIN_ID", default_value = "popstore")]
    chain_id: String,
    #[arg(long, env = "POPSTORE_BLOCK_INTERVAL_MS", default_value_t = 1000)]
    block_interval_ms: u64,
    /// Transactions held for the next block before broadcasts are refused.
    #[arg(long, env = "POPSTORE_MEMPOOL_CAPACITY", default_value_t = 10_000)]
    mempool_capacity: usize,
    #[arg(long, env = "POPSTORE_AUTH_TOKEN")]
    auth_token: Option<String>,
}

impl Args {
    fn into_config(self) -> NodeConfig {
        NodeConfig {
            bind_addr: self.bind,
            backend: self.backend,
            file_path: self.file_path,
            sqlite_path: self.sqlite_path,
            couch_url: self.couch_url,
            elastic_url: self.elastic_url,
            create_indexes: self.create_indexes,
            rules_path: self.rules,
            chain_id: self.chain_id,
            block_interval: Duration::from_millis(self.block_interval_ms.max(1)),
            mempool_capacity: self.mempool_capacity.max(1),
            auth_token: self.auth_token,
            ..NodeConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    init_telemetry();
    let cfg = Args::parse().into_config();
    tracing::info!(backend = %cfg.backend, bind = %cfg.bind_addr, chain_id = %cfg.chain_id, "starting popstore node");

    if let Err(e) = run(cfg).await {
        tracing::error!(error = %e, "node stopped");
        std::process::exit(1);
    }
}

async fn run(cfg: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let root = Context::background();
    let adapter = open_backend(&cfg).await?;

    let governance = GovernanceManager::new(&root, adapter.clone(), cfg.rules_path.clone(), PluginRegistry::new()).await?;
    if cfg.rules_path.is_some() {
        governance.watch(root.child())?;
    }

    let engine = ReplicatedEngine::new(
        &root,
        adapter,
        EngineConfig {
            version: cfg.version.clone(),
            commit: cfg.commit.clone(),
        },
    )
    .await?
    .with_validators(governance.subscribe());
    let engine: SharedEngine = Arc::new(Mutex::new(engine));

    let mempool = Arc::new(Mempool::new(cfg.mempool_capacity));
    BlockProducer::new(engine.clone(), mempool.clone(), cfg.chain_id.clone()).spawn(root.child(), cfg.block_interval);

    let app = build_router(AppState { engine, mempool }, cfg.auth_token.clone());
    let listener = TcpListener::bind(cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);

    let shutdown = root.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}
