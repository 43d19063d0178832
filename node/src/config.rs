// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
    Sqlite,
    Couch,
    Elastic,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "sqlite" | "sql" => Ok(BackendKind::Sqlite),
            "couch" | "couchdb" => Ok(BackendKind::Couch),
            "elastic" | "elasticsearch" => Ok(BackendKind::Elastic),
            other => Err(format!("unknown backend {other:?}")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Couch => "couch",
            BackendKind::Elastic => "elastic",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    pub backend: BackendKind,
    pub file_path: PathBuf,
    pub sqlite_path: PathBuf,
    pub couch_url: String,
    pub elastic_url: String,
    pub create_indexes: bool,
    pub rules_path: Option<PathBuf>,
    pub chain_id: String,
    pub block_interval: Duration,
    pub mempool_capacity: usize,
    pub auth_token: Option<String>,
    pub version: String,
    pub commit: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            backend: BackendKind::Memory,
            file_path: PathBuf::from("data/segments"),
            sqlite_path: PathBuf::from("data/popstore.db"),
            couch_url: "http://localhost:5984".into(),
            elastic_url: "http://localhost:9200".into(),
            create_indexes: true,
            rules_path: None,
            chain_id: "popstore".into(),
            block_interval: Duration::from_millis(1000),
            mempool_capacity: 10_000,
            auth_token: None,
            version: env!("CARGO_PKG_VERSION").into(),
            commit: option_env!("POPSTORE_GIT_COMMIT").unwrap_or("unknown").into(),
        }
    }
}
