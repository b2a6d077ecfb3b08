// Shared harness for multi-process-style integration tests: real servers
// on ephemeral ports, one shared data directory per cluster.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpStream;

use rusty_ledger::config::{CoordinatorConfig, NodeAddr, NodeConfig};
use rusty_ledger::coordinator::Coordinator;
use rusty_ledger::node::NodeServer;
use rusty_ledger::protocol::framing;
use rusty_ledger::protocol::Message;

pub struct Cluster {
    _tmp: TempDir,
    pub data_dir: PathBuf,
    pub coordinator_addr: SocketAddr,
    pub node_addrs: HashMap<String, SocketAddr>,
}

/// Starts one node per seed entry plus a coordinator wired to all of them.
pub async fn start_cluster(seeds: &[(&str, &[(&str, i64)])]) -> Cluster {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().to_path_buf();

    let mut node_addrs = HashMap::new();
    let mut node_map = HashMap::new();
    for (node_id, balances) in seeds {
        let addr = start_node(&data_dir, node_id, balances).await;
        node_addrs.insert(node_id.to_string(), addr);
        node_map.insert(node_id.to_string(), NodeAddr::new("127.0.0.1", addr.port()));
    }

    let coordinator_addr = start_coordinator(&data_dir, node_map).await;

    Cluster {
        _tmp: tmp,
        data_dir,
        coordinator_addr,
        node_addrs,
    }
}

/// Seeds a snapshot file and boots one participant on port 0.
pub async fn start_node(data_dir: &Path, node_id: &str, balances: &[(&str, i64)]) -> SocketAddr {
    let config = NodeConfig {
        node_id: node_id.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        data_dir: data_dir.to_path_buf(),
    };
    if !balances.is_empty() {
        seed_snapshot(&config.state_path(), balances);
    }

    let server = NodeServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

/// Boots a coordinator on port 0, runs recovery, then serves.
pub async fn start_coordinator(
    data_dir: &Path,
    node_map: HashMap<String, NodeAddr>,
) -> SocketAddr {
    let config = CoordinatorConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        nodes: node_map,
        data_dir: data_dir.to_path_buf(),
        prepare_timeout: Duration::from_secs(2),
        commit_timeout: Duration::from_secs(2),
    };
    let coordinator = Coordinator::bind(config).await.unwrap();
    let addr = coordinator.local_addr().unwrap();
    coordinator.recover().await.unwrap();
    tokio::spawn(coordinator.run());
    addr
}

pub fn seed_snapshot(path: &Path, balances: &[(&str, i64)]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let map: BTreeMap<&str, i64> = balances.iter().copied().collect();
    std::fs::write(path, serde_json::to_vec(&map).unwrap()).unwrap();
}

/// One request, one response, over a fresh connection.
pub async fn exchange(addr: SocketAddr, request: &Message) -> Message {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    framing::write_message(&mut stream, request).await.unwrap();
    framing::read_message(&mut stream).await.unwrap()
}

/// Issues a TRANSFER and returns (success, txid, reason).
pub async fn transfer(
    cluster: &Cluster,
    from_node: &str,
    from_account: &str,
    to_node: &str,
    to_account: &str,
    amount: i64,
) -> (bool, String, Option<String>) {
    let request = Message::Transfer {
        from_node: from_node.to_string(),
        from_account: from_account.to_string(),
        to_node: to_node.to_string(),
        to_account: to_account.to_string(),
        amount,
    };
    match exchange(cluster.coordinator_addr, &request).await {
        Message::TransferResult {
            success,
            txid,
            reason,
        } => (success, txid, reason),
        other => panic!("unexpected response: {:?}", other),
    }
}

pub async fn read_balance(cluster: &Cluster, node_id: &str, account_id: &str) -> i64 {
    let request = Message::Read {
        account_id: account_id.to_string(),
    };
    match exchange(cluster.node_addrs[node_id], &request).await {
        Message::ReadResult { balance, .. } => balance,
        other => panic!("unexpected response: {:?}", other),
    }
}

/// Raw WAL lines for a node, as JSON values.
pub fn wal_records(data_dir: &Path, node_id: &str) -> Vec<serde_json::Value> {
    read_jsonl(&data_dir.join(format!("node_{}_log.jsonl", node_id)))
}

/// Raw decision log lines, as JSON values.
pub fn decision_records(data_dir: &Path) -> Vec<serde_json::Value> {
    read_jsonl(&data_dir.join("coordinator_tx_log.jsonl"))
}

fn read_jsonl(path: &Path) -> Vec<serde_json::Value> {
    if !path.exists() {
        return Vec::new();
    }
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// The `type` tags of a record stream filtered to one txid.
pub fn record_types_for(records: &[serde_json::Value], txid: &str) -> Vec<String> {
    records
        .iter()
        .filter(|r| r["txid"] == txid)
        .map(|r| r["type"].as_str().unwrap().to_string())
        .collect()
}
