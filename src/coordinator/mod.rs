// Transaction coordinator: accepts client TRANSFER requests and drives
// each one through two-phase commit against the participant nodes.
//
// Every phase transition is durable in the decision log before its effect
// is visible on the wire. The decision is authoritative once logged: a
// COMMIT that cannot be delivered to every participant still completes as
// committed, with the inconsistency logged for reconciliation.

pub mod decision_log;
pub mod dispatch;
pub mod txn;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::error::{LedgerError, Result};
use crate::protocol::framing;
use crate::protocol::Message;

use decision_log::{pending_transactions, DecisionLog, DecisionRecord};
use dispatch::ParticipantClient;
use txn::{plan_operations, NodeOps, TxnState};

/// Coordinator server.
pub struct Coordinator {
    log: Arc<DecisionLog>,
    client: Arc<ParticipantClient>,
    /// In-flight transactions and their current state.
    active: Arc<Mutex<HashMap<String, TxnState>>>,
    listener: TcpListener,
}

impl Coordinator {
    /// Opens the decision log and binds the listening socket.
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let log = Arc::new(DecisionLog::open(config.log_path())?);
        let client = Arc::new(ParticipantClient::new(
            config.nodes.clone(),
            config.prepare_timeout,
            config.commit_timeout,
        ));

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| LedgerError::Network(format!("bind failed: {}", e)))?;

        Ok(Self {
            log,
            client,
            active: Arc::new(Mutex::new(HashMap::new())),
            listener,
        })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| LedgerError::Network(e.to_string()))
    }

    /// Resolves every transaction left incomplete by a previous run.
    ///
    /// A txid whose last decision is COMMIT is re-delivered (participants
    /// dedupe repeats); everything else is aborted and completed as
    /// `aborted_during_recovery`.
    pub async fn recover(&self) -> Result<()> {
        let records = self.log.load()?;
        let pending = pending_transactions(&records);
        if pending.is_empty() {
            info!("decision log clean, nothing to recover");
            return Ok(());
        }

        info!("recovering {} in-flight transaction(s)", pending.len());
        for txn in pending {
            if txn.decided_commit {
                info!(
                    "txn {}: COMMIT decided but incomplete, re-delivering",
                    txn.txid
                );
                let failed = self.client.deliver_commit(&txn.txid, &txn.node_ops).await;
                if !failed.is_empty() {
                    error!(
                        "txn {}: COMMIT still undelivered to {:?} after recovery retries",
                        txn.txid, failed
                    );
                }
                self.log.append(&DecisionRecord::Complete {
                    txid: txn.txid.clone(),
                    status: "committed".to_string(),
                })?;
            } else {
                info!("txn {}: no commit decision on record, aborting", txn.txid);
                self.client
                    .deliver_abort(&txn.txid, txn.node_ops.keys())
                    .await;
                self.log.append(&DecisionRecord::Abort {
                    txid: txn.txid.clone(),
                    status: "recovered".to_string(),
                })?;
                self.log.append(&DecisionRecord::Complete {
                    txid: txn.txid.clone(),
                    status: "aborted_during_recovery".to_string(),
                })?;
            }
        }
        Ok(())
    }

    /// Accept loop. One spawned task per client connection.
    pub async fn run(self) -> Result<()> {
        info!("coordinator listening on {}", self.local_addr()?);

        loop {
            let (socket, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| LedgerError::Network(e.to_string()))?;

            let handler = ClientHandler {
                log: self.log.clone(),
                client: self.client.clone(),
                active: self.active.clone(),
            };
            tokio::spawn(async move {
                if let Err(e) = handler.handle(socket).await {
                    debug!("client connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

struct ClientHandler {
    log: Arc<DecisionLog>,
    client: Arc<ParticipantClient>,
    active: Arc<Mutex<HashMap<String, TxnState>>>,
}

impl ClientHandler {
    async fn handle(&self, mut socket: TcpStream) -> Result<()> {
        loop {
            match framing::read_message_opt(&mut socket).await {
                Ok(Some(Message::Transfer {
                    from_node,
                    from_account,
                    to_node,
                    to_account,
                    amount,
                })) => {
                    let response = self
                        .transfer(from_node, from_account, to_node, to_account, amount)
                        .await;
                    framing::write_message(&mut socket, &response).await?;
                }
                Ok(Some(other)) => {
                    warn!("client sent non-TRANSFER request: {:?}", other);
                    framing::write_message(&mut socket, &invalid_request(String::new())).await?;
                }
                Ok(None) => break,
                Err(LedgerError::Serialization(e)) => {
                    warn!("malformed client frame: {}", e);
                    framing::write_message(&mut socket, &invalid_request(String::new())).await?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Validates the request, then drives 2PC. Rejections happen before
    /// any decision log record or txid is minted.
    async fn transfer(
        &self,
        from_node: String,
        from_account: String,
        to_node: String,
        to_account: String,
        amount: i64,
    ) -> Message {
        if let Err(detail) =
            self.validate(&from_node, &from_account, &to_node, &to_account, amount)
        {
            info!("rejecting transfer: {}", detail);
            return invalid_request(String::new());
        }

        let txid = Uuid::new_v4().to_string();
        let node_ops = plan_operations(&from_node, &from_account, &to_node, &to_account, amount);
        info!(
            "txn {}: transfer {} from {}/{} to {}/{}",
            txid, amount, from_node, from_account, to_node, to_account
        );

        match self.execute(&txid, node_ops).await {
            Ok(result) => result,
            Err(e) => {
                error!("txn {}: coordinator failure: {}", txid, e);
                self.active.lock().remove(&txid);
                Message::TransferResult {
                    success: false,
                    txid,
                    reason: Some("coordinator_error".to_string()),
                }
            }
        }
    }

    fn validate(
        &self,
        from_node: &str,
        from_account: &str,
        to_node: &str,
        to_account: &str,
        amount: i64,
    ) -> std::result::Result<(), String> {
        if amount <= 0 {
            return Err(format!("non-positive amount {}", amount));
        }
        if !self.client.knows(from_node) {
            return Err(format!("unknown participant '{}'", from_node));
        }
        if !self.client.knows(to_node) {
            return Err(format!("unknown participant '{}'", to_node));
        }
        if from_node == to_node && from_account == to_account {
            return Err(format!(
                "source and destination are the same account {}/{}",
                from_node, from_account
            ));
        }
        Ok(())
    }

    /// The 2PC state machine for one transaction.
    async fn execute(&self, txid: &str, node_ops: NodeOps) -> Result<Message> {
        self.set_state(txid, TxnState::Started);
        self.log.append(&DecisionRecord::Start {
            txid: txid.to_string(),
            node_ops: node_ops.clone(),
        })?;

        self.log.append(&DecisionRecord::Prepare {
            txid: txid.to_string(),
        })?;
        self.set_state(txid, TxnState::Preparing);

        let tally = self.client.gather_votes(txid, &node_ops).await;

        if tally.all_commit {
            // The decision is durable before any participant hears it.
            self.log.append(&DecisionRecord::Commit {
                txid: txid.to_string(),
                status: "committed".to_string(),
            })?;
            self.set_state(txid, TxnState::Committing);

            let failed = self.client.deliver_commit(txid, &node_ops).await;
            if !failed.is_empty() {
                error!(
                    "txn {}: COMMIT undelivered to {:?} after retries; \
                     decision remains committed, those nodes stay prepared",
                    txid, failed
                );
            }

            self.log.append(&DecisionRecord::Complete {
                txid: txid.to_string(),
                status: "committed".to_string(),
            })?;
            self.finish(txid, TxnState::CompletedCommitted);

            Ok(Message::TransferResult {
                success: true,
                txid: txid.to_string(),
                reason: None,
            })
        } else {
            self.log.append(&DecisionRecord::Abort {
                txid: txid.to_string(),
                status: "aborted".to_string(),
            })?;
            self.set_state(txid, TxnState::Aborting);

            self.client.deliver_abort(txid, node_ops.keys()).await;

            self.log.append(&DecisionRecord::Complete {
                txid: txid.to_string(),
                status: "aborted".to_string(),
            })?;
            self.finish(txid, TxnState::CompletedAborted);

            Ok(Message::TransferResult {
                success: false,
                txid: txid.to_string(),
                reason: tally.abort_reason.or_else(|| Some("aborted".to_string())),
            })
        }
    }

    fn set_state(&self, txid: &str, state: TxnState) {
        self.active.lock().insert(txid.to_string(), state);
    }

    fn finish(&self, txid: &str, state: TxnState) {
        debug_assert!(state.is_terminal());
        debug!("txn {} finished as {:?}", txid, state);
        self.active.lock().remove(txid);
    }
}

fn invalid_request(txid: String) -> Message {
    Message::TransferResult {
        success: false,
        txid,
        reason: Some("invalid_request".to_string()),
    }
}
