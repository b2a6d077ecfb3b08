// Participant write-ahead log.
//
// Append-only, one JSON object per line, fsynced before the record's
// outward-visible effect (a vote or an ACK). The snapshot remains the
// source of balances on restart; the log is scanned once at startup only
// to rebuild the committed-txid set used for COMMIT deduplication.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::protocol::Operation;

/// One WAL record. The `type` tags are part of the on-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalRecord {
    /// All locks acquired and every projected balance is feasible.
    PrepareOk { txid: String, ops: Vec<Operation> },
    /// Vote-abort, with the reason reported to the coordinator.
    PrepareFailed { txid: String, reason: String },
    /// One applied balance mutation.
    Update {
        txid: String,
        account_id: String,
        delta: i64,
        old_balance: i64,
        new_balance: i64,
    },
    /// Terminal marker: every update for this txid is applied and durable.
    Commit { txid: String },
    /// Terminal marker: the transaction was discarded.
    Abort { txid: String },
}

/// Append-only WAL with an in-memory index of committed txids.
pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<File>,
    committed: Mutex<HashSet<String>>,
}

impl WriteAheadLog {
    /// Opens (or creates) the log and scans existing records to rebuild
    /// the committed-txid set. Unparseable lines are skipped with a
    /// warning, matching the coordinator's decision-log policy.
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut committed = HashSet::new();
        if path.exists() {
            for record in Self::read_records(&path)? {
                if let WalRecord::Commit { txid } = record {
                    committed.insert(txid);
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            committed: Mutex::new(committed),
        })
    }

    /// Appends one record and fsyncs before returning.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        {
            let mut file = self.file.lock();
            file.write_all(&line)?;
            file.sync_all()?;
        }

        if let WalRecord::Commit { txid } = record {
            self.committed.lock().insert(txid.clone());
        }
        Ok(())
    }

    /// True if a `commit` record for this txid is already durable.
    pub fn is_committed(&self, txid: &str) -> bool {
        self.committed.lock().contains(txid)
    }

    /// Reads the whole log back, skipping unparseable lines.
    pub fn records(&self) -> Result<Vec<WalRecord>> {
        Self::read_records(&self.path)
    }

    fn read_records(path: &Path) -> Result<Vec<WalRecord>> {
        let reader = BufReader::new(File::open(path)?);
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
                        "skipping unparseable WAL line {} in {}: {}",
                        lineno + 1,
                        path.display(),
                        e
                    );
                }
            }
        }
        Ok(records)
    }
}
