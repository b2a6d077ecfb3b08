// Participant fan-out.
//
// Each message to a participant rides its own short-lived TCP connection:
// connect, one framed request, one framed response, close. PREPARE and the
// outcome broadcasts go to all involved participants in parallel. A
// non-response during PREPARE is indistinguishable from a vote-abort;
// during COMMIT it is retried with bounded backoff because the decision is
// already durable.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::config::NodeAddr;
use crate::error::{LedgerError, Result};
use crate::protocol::framing;
use crate::protocol::Message;

use super::txn::NodeOps;

/// Delivery attempts for a COMMIT before the coordinator gives up and
/// records the inconsistency.
const COMMIT_RETRY_ATTEMPTS: u32 = 3;

/// Delivery attempts for a best-effort ABORT.
const ABORT_RETRY_ATTEMPTS: u32 = 2;

/// Base backoff between retries; doubles per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Combined result of a PREPARE round.
#[derive(Debug)]
pub struct VoteTally {
    pub all_commit: bool,
    /// First refusal reason seen, surfaced to the client.
    pub abort_reason: Option<String>,
}

/// Client side of the coordinator-to-participant protocol.
pub struct ParticipantClient {
    nodes: HashMap<String, NodeAddr>,
    prepare_timeout: Duration,
    commit_timeout: Duration,
}

impl ParticipantClient {
    pub fn new(
        nodes: HashMap<String, NodeAddr>,
        prepare_timeout: Duration,
        commit_timeout: Duration,
    ) -> Self {
        Self {
            nodes,
            prepare_timeout,
            commit_timeout,
        }
    }

    pub fn knows(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// One request, one response, over a fresh connection, under a deadline.
    async fn call(&self, node_id: &str, message: &Message, deadline: Duration) -> Result<Message> {
        let addr = self
            .nodes
            .get(node_id)
            .ok_or_else(|| LedgerError::Config(format!("unknown node '{}'", node_id)))?;

        let exchange = async {
            let mut stream = TcpStream::connect(addr.endpoint())
                .await
                .map_err(|e| LedgerError::Network(format!("connect to {}: {}", node_id, e)))?;
            framing::write_message(&mut stream, message).await?;
            framing::read_message(&mut stream).await
        };

        timeout(deadline, exchange)
            .await
            .map_err(|_| LedgerError::Network(format!("timeout waiting on node '{}'", node_id)))?
    }

    /// Sends PREPARE to every involved participant in parallel and gathers
    /// the votes. Any refusal, transport error, or timeout counts as a
    /// vote-abort.
    pub async fn gather_votes(&self, txid: &str, node_ops: &NodeOps) -> VoteTally {
        let calls = node_ops.iter().map(|(node_id, ops)| async move {
            let request = Message::Prepare {
                txid: txid.to_string(),
                operations: ops.clone(),
            };
            match self.call(node_id, &request, self.prepare_timeout).await {
                Ok(Message::VoteCommit { .. }) => None,
                Ok(Message::VoteAbort { reason, .. }) => {
                    info!("txn {}: node {} voted abort: {}", txid, node_id, reason);
                    Some(reason)
                }
                Ok(other) => {
                    warn!(
                        "txn {}: node {} sent unexpected vote {:?}",
                        txid, node_id, other
                    );
                    Some(format!("unexpected_response_from_{}", node_id))
                }
                Err(e) => {
                    warn!("txn {}: PREPARE to node {} failed: {}", txid, node_id, e);
                    Some(format!("node_{}_unreachable", node_id))
                }
            }
        });

        let refusals: Vec<Option<String>> = join_all(calls).await;
        let abort_reason = refusals.iter().flatten().next().cloned();
        VoteTally {
            all_commit: abort_reason.is_none(),
            abort_reason,
        }
    }

    /// Broadcasts the COMMIT outcome. Returns the participants that never
    /// acknowledged; the decision stays committed regardless.
    pub async fn deliver_commit(&self, txid: &str, node_ops: &NodeOps) -> Vec<String> {
        let calls = node_ops.iter().map(|(node_id, ops)| async move {
            let request = Message::Commit {
                txid: txid.to_string(),
                operations: ops.clone(),
            };
            if self
                .deliver_with_retry(node_id, &request, COMMIT_RETRY_ATTEMPTS)
                .await
            {
                None
            } else {
                Some(node_id.clone())
            }
        });

        join_all(calls).await.into_iter().flatten().collect()
    }

    /// Broadcasts ABORT, best-effort. Participants that never heard the
    /// PREPARE treat it as a no-op.
    pub async fn deliver_abort(&self, txid: &str, participants: impl Iterator<Item = &String>) {
        let calls = participants.map(|node_id| async move {
            let request = Message::Abort {
                txid: txid.to_string(),
            };
            if !self
                .deliver_with_retry(node_id, &request, ABORT_RETRY_ATTEMPTS)
                .await
            {
                warn!("txn {}: ABORT to node {} never acknowledged", txid, node_id);
            }
        });
        join_all(calls).await;
    }

    /// Retries one outcome delivery with doubling backoff until an ACK
    /// arrives or attempts run out.
    async fn deliver_with_retry(&self, node_id: &str, message: &Message, attempts: u32) -> bool {
        let mut backoff = RETRY_BACKOFF;
        for attempt in 1..=attempts {
            match self.call(node_id, message, self.commit_timeout).await {
                Ok(Message::Ack { .. }) => return true,
                Ok(other) => {
                    warn!(
                        "node {} answered outcome delivery with {:?} (attempt {}/{})",
                        node_id, other, attempt, attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "outcome delivery to node {} failed (attempt {}/{}): {}",
                        node_id, attempt, attempts, e
                    );
                }
            }
            if attempt < attempts {
                sleep(backoff).await;
                backoff *= 2;
            }
        }
        false
    }
}
