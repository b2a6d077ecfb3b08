// Process configuration for the coordinator and participant binaries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LedgerError, Result};

/// Network location of a participant node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form accepted by `TcpStream::connect`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    /// Participant id -> network address.
    pub nodes: HashMap<String, NodeAddr>,
    pub data_dir: PathBuf,
    pub prepare_timeout: Duration,
    pub commit_timeout: Duration,
}

impl CoordinatorConfig {
    /// Path of the durable decision log.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("coordinator_tx_log.jsonl")
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7400,
            nodes: HashMap::new(),
            data_dir: PathBuf::from("./data"),
            prepare_timeout: Duration::from_secs(5),
            commit_timeout: Duration::from_secs(15),
        }
    }
}

/// Participant node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

impl NodeConfig {
    /// Path of the balance snapshot.
    pub fn state_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("node_{}_state.json", self.node_id))
    }

    /// Path of the write-ahead log.
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("node_{}_log.jsonl", self.node_id))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "N1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 7401,
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Parses a participant map of the form `id:host:port[,id:host:port...]`.
pub fn parse_node_map(raw: &str) -> Result<HashMap<String, NodeAddr>> {
    let mut nodes = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(3, ':');
        let (id, host, port) = match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(host), Some(port)) if !id.is_empty() && !host.is_empty() => {
                (id, host, port)
            }
            _ => {
                return Err(LedgerError::Config(format!(
                    "malformed node entry '{}' (expected id:host:port)",
                    entry
                )))
            }
        };
        let port: u16 = port.parse().map_err(|_| {
            LedgerError::Config(format!("invalid port '{}' for node '{}'", port, id))
        })?;
        if nodes
            .insert(id.to_string(), NodeAddr::new(host, port))
            .is_some()
        {
            return Err(LedgerError::Config(format!("duplicate node id '{}'", id)));
        }
    }
    if nodes.is_empty() {
        return Err(LedgerError::Config(
            "node map must name at least one participant".to_string(),
        ));
    }
    Ok(nodes)
}
