// Durable decision log.
//
// One JSON object per line, appended and fsynced before the phase it
// records becomes outwardly visible: START before any PREPARE is sent,
// COMMIT/ABORT before that outcome is sent, COMPLETE after deliveries
// have been attempted. A transaction is complete iff a COMPLETE record
// exists; everything else is in flight and must be resolved on restart.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

use super::txn::NodeOps;

/// One phase record. The `type` tags are part of the on-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionRecord {
    Start { txid: String, node_ops: NodeOps },
    Prepare { txid: String },
    Commit { txid: String, status: String },
    Abort { txid: String, status: String },
    Complete { txid: String, status: String },
}

impl DecisionRecord {
    pub fn txid(&self) -> &str {
        match self {
            DecisionRecord::Start { txid, .. }
            | DecisionRecord::Prepare { txid }
            | DecisionRecord::Commit { txid, .. }
            | DecisionRecord::Abort { txid, .. }
            | DecisionRecord::Complete { txid, .. } => txid,
        }
    }
}

/// A transaction found in the log with no COMPLETE record.
#[derive(Debug, Clone)]
pub struct PendingTxn {
    pub txid: String,
    pub node_ops: NodeOps,
    /// True when the last decision on record is COMMIT: the outcome is
    /// already authoritative and must be re-delivered, not aborted.
    pub decided_commit: bool,
}

/// Append-only log with fsync-per-record durability.
pub struct DecisionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl DecisionLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn append(&self, record: &DecisionRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads the whole log in order. Unparseable lines are skipped with a
    /// warning rather than failing startup.
    pub fn load(&self) -> Result<Vec<DecisionRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        "skipping unparseable decision log line {} in {}: {}",
                        lineno + 1,
                        self.path.display(),
                        e
                    );
                }
            }
        }
        Ok(records)
    }
}

/// Groups log records by txid and returns every transaction that never
/// reached COMPLETE, preserving first-seen order.
pub fn pending_transactions(records: &[DecisionRecord]) -> Vec<PendingTxn> {
    struct Entry {
        node_ops: NodeOps,
        decided_commit: bool,
        complete: bool,
    }

    let mut order: Vec<String> = Vec::new();
    let mut by_txid: BTreeMap<String, Entry> = BTreeMap::new();

    for record in records {
        let txid = record.txid().to_string();
        let entry = by_txid.entry(txid.clone()).or_insert_with(|| {
            order.push(txid);
            Entry {
                node_ops: NodeOps::new(),
                decided_commit: false,
                complete: false,
            }
        });
        match record {
            DecisionRecord::Start { node_ops, .. } => {
                entry.node_ops = node_ops.clone();
            }
            DecisionRecord::Prepare { .. } => {}
            DecisionRecord::Commit { .. } => entry.decided_commit = true,
            DecisionRecord::Abort { .. } => entry.decided_commit = false,
            DecisionRecord::Complete { .. } => entry.complete = true,
        }
    }

    order
        .into_iter()
        .filter_map(|txid| {
            let entry = &by_txid[&txid];
            if entry.complete {
                return None;
            }
            Some(PendingTxn {
                txid,
                node_ops: entry.node_ops.clone(),
                decided_commit: entry.decided_commit,
            })
        })
        .collect()
}
