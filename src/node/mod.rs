// Participant node: owns a partition of accounts and serves the 2PC
// participant side of the wire protocol.
//
// PREPARE takes every touched account lock without blocking (any refusal
// is an immediate vote-abort), checks feasibility against committed
// balances, and releases all locks before the vote is sent. Isolation is
// therefore guaranteed only across the prepare critical section; COMMIT
// compensates by recomputing from the live balance rather than trusting
// the prepare-time projection.

pub mod accounts;
pub mod wal;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{LedgerError, Result};
use crate::protocol::framing;
use crate::protocol::{Message, Operation};

use accounts::AccountStore;
use wal::{WalRecord, WriteAheadLog};

/// Participant server.
pub struct NodeServer {
    node_id: String,
    store: Arc<AccountStore>,
    wal: Arc<WriteAheadLog>,
    listener: TcpListener,
}

impl NodeServer {
    /// Loads durable state and binds the listening socket.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(AccountStore::open(config.state_path())?);
        let wal = Arc::new(WriteAheadLog::open(config.wal_path())?);

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| LedgerError::Network(format!("bind failed: {}", e)))?;

        Ok(Self {
            node_id: config.node_id,
            store,
            wal,
            listener,
        })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| LedgerError::Network(e.to_string()))
    }

    /// Accept loop. One spawned task per connection.
    pub async fn run(self) -> Result<()> {
        info!(
            "node {} listening on {}",
            self.node_id,
            self.local_addr()?
        );

        loop {
            let (socket, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| LedgerError::Network(e.to_string()))?;

            let handler = NodeHandler {
                node_id: self.node_id.clone(),
                store: self.store.clone(),
                wal: self.wal.clone(),
            };
            tokio::spawn(async move {
                if let Err(e) = handler.handle(socket).await {
                    debug!("connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

struct NodeHandler {
    node_id: String,
    store: Arc<AccountStore>,
    wal: Arc<WriteAheadLog>,
}

impl NodeHandler {
    async fn handle(&self, mut socket: TcpStream) -> Result<()> {
        while let Some(request) = framing::read_message_opt(&mut socket).await? {
            let response = self.dispatch(request)?;
            framing::write_message(&mut socket, &response).await?;
        }
        Ok(())
    }

    /// Request dispatch. Fully synchronous: every lock taken here is
    /// released before the response goes back out on the socket.
    fn dispatch(&self, request: Message) -> Result<Message> {
        match request {
            Message::Prepare { txid, operations } => self.prepare(txid, operations),
            Message::Commit { txid, operations } => self.commit(txid, operations),
            Message::Abort { txid } => self.abort(txid),
            Message::Read { account_id } => Ok(self.read(account_id)),
            other => Err(LedgerError::Protocol(format!(
                "unexpected request on node {}: {:?}",
                self.node_id, other
            ))),
        }
    }

    /// Voting phase. Locks are acquired in ascending account order without
    /// blocking; any refusal or infeasible projection is a vote-abort.
    fn prepare(&self, txid: String, mut operations: Vec<Operation>) -> Result<Message> {
        operations.sort_by(|a, b| a.account_id.cmp(&b.account_id));

        let handles: Vec<_> = operations
            .iter()
            .map(|op| self.store.lock_handle(&op.account_id))
            .collect();

        let mut guards = Vec::with_capacity(handles.len());
        for (handle, op) in handles.iter().zip(&operations) {
            match handle.try_lock() {
                Some(guard) => guards.push(guard),
                None => {
                    drop(guards);
                    let reason = format!("lock_contention_on_{}", op.account_id);
                    warn!("txn {} vote-abort on node {}: {}", txid, self.node_id, reason);
                    self.wal.append(&WalRecord::PrepareFailed {
                        txid: txid.clone(),
                        reason: reason.clone(),
                    })?;
                    return Ok(Message::VoteAbort { txid, reason });
                }
            }
        }

        for op in &operations {
            let projected = self.store.balance(&op.account_id) + op.delta;
            if projected < 0 {
                drop(guards);
                let reason = "insufficient_balance".to_string();
                info!(
                    "txn {} vote-abort on node {}: {} would leave {} at {}",
                    txid, self.node_id, reason, op.account_id, projected
                );
                self.wal.append(&WalRecord::PrepareFailed {
                    txid: txid.clone(),
                    reason: reason.clone(),
                })?;
                return Ok(Message::VoteAbort { txid, reason });
            }
        }

        self.wal.append(&WalRecord::PrepareOk {
            txid: txid.clone(),
            ops: operations,
        })?;

        // All account locks drop here, before the vote leaves the node.
        drop(guards);
        debug!("txn {} prepared on node {}", txid, self.node_id);
        Ok(Message::VoteCommit { txid })
    }

    /// Decision phase. Recomputes from live balances (another transaction
    /// may have prepared and committed since our vote), one account lock
    /// at a time, snapshotting after every applied operation.
    fn commit(&self, txid: String, mut operations: Vec<Operation>) -> Result<Message> {
        if self.wal.is_committed(&txid) {
            debug!(
                "duplicate COMMIT for txn {} on node {}, already applied",
                txid, self.node_id
            );
            return Ok(Message::Ack { txid });
        }

        operations.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        for op in &operations {
            let handle = self.store.lock_handle(&op.account_id);
            let _guard = handle.lock();

            let old_balance = self.store.balance(&op.account_id);
            let new_balance = old_balance + op.delta;

            self.wal.append(&WalRecord::Update {
                txid: txid.clone(),
                account_id: op.account_id.clone(),
                delta: op.delta,
                old_balance,
                new_balance,
            })?;
            self.store.set_balance(&op.account_id, new_balance);
            self.store.write_snapshot()?;
        }

        self.wal.append(&WalRecord::Commit { txid: txid.clone() })?;
        info!("txn {} committed on node {}", txid, self.node_id);
        Ok(Message::Ack { txid })
    }

    /// Idempotent, safe for txids this node never prepared.
    fn abort(&self, txid: String) -> Result<Message> {
        self.wal.append(&WalRecord::Abort { txid: txid.clone() })?;
        debug!("txn {} aborted on node {}", txid, self.node_id);
        Ok(Message::Ack { txid })
    }

    fn read(&self, account_id: String) -> Message {
        let handle = self.store.lock_handle(&account_id);
        let _guard = handle.lock();
        let balance = self.store.balance(&account_id);
        Message::ReadResult {
            account_id,
            balance,
        }
    }
}
