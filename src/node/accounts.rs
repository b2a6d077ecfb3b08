// In-memory account state with per-account locking and a durable snapshot.
//
// Balances and locks live in concurrent maps; entries are created lazily on
// first reference, with an unseen account reading as balance 0. All balance
// mutations happen while holding that account's lock. The snapshot is the
// authoritative on-disk state and is rewritten atomically after every
// applied operation.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{LedgerError, Result};

#[derive(Debug)]
pub struct AccountStore {
    balances: DashMap<String, i64>,
    /// Account id -> its lock. The map's own shard locks stand in for the
    /// short-lived global mutex that guards lock creation.
    locks: DashMap<String, Arc<Mutex<()>>>,
    state_path: PathBuf,
    /// Serializes snapshot writes so concurrent commits cannot interleave
    /// their temp-file renames.
    snapshot_lock: Mutex<()>,
}

impl AccountStore {
    /// Loads the snapshot if one exists, otherwise starts empty.
    ///
    /// A snapshot that exists but does not parse is fatal: the node must
    /// refuse to start rather than serve balances it cannot trust.
    pub fn open(state_path: PathBuf) -> Result<Self> {
        let balances = DashMap::new();
        if state_path.exists() {
            let raw = fs::read_to_string(&state_path)?;
            let snapshot: BTreeMap<String, i64> = serde_json::from_str(&raw).map_err(|e| {
                LedgerError::Corrupt(format!(
                    "state file {} is unreadable: {}",
                    state_path.display(),
                    e
                ))
            })?;
            for (account_id, balance) in snapshot {
                balances.insert(account_id, balance);
            }
        }

        Ok(Self {
            balances,
            locks: DashMap::new(),
            state_path,
            snapshot_lock: Mutex::new(()),
        })
    }

    /// Returns the lock for an account, creating it on first reference.
    pub fn lock_handle(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Current committed balance; unseen accounts read as 0.
    pub fn balance(&self, account_id: &str) -> i64 {
        self.balances.get(account_id).map(|b| *b).unwrap_or(0)
    }

    /// Sets a balance. Callers must hold the account's lock.
    pub fn set_balance(&self, account_id: &str, balance: i64) {
        self.balances.insert(account_id.to_string(), balance);
    }

    /// Writes the full balance mapping atomically: temp file in the same
    /// directory, fsync, rename over the snapshot path.
    pub fn write_snapshot(&self) -> Result<()> {
        let _guard = self.snapshot_lock.lock();

        let snapshot: BTreeMap<String, i64> = self
            .balances
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let body = serde_json::to_vec_pretty(&snapshot)?;

        let tmp_path = self.state_path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&body)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.state_path)?;
        Ok(())
    }
}
