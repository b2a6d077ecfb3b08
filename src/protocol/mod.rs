// Wire protocol shared by every process in the system.
//
// All traffic - client to coordinator and coordinator to participant -
// uses the same length-framed JSON messages, discriminated by a `type`
// field. The JSON field names here are an external contract; the client,
// coordinator, and node binaries must interoperate on them exactly.

use serde::{Deserialize, Serialize};

pub mod framing;

/// A single balance mutation against one account on one participant.
///
/// A transfer produces exactly one negative-delta operation on the source
/// participant and one positive-delta operation on the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub account_id: String,
    pub delta: i64,
}

impl Operation {
    pub fn new(account_id: impl Into<String>, delta: i64) -> Self {
        Self {
            account_id: account_id.into(),
            delta,
        }
    }
}

/// Every message exchanged over TCP, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Client request: move `amount` from one account to another.
    #[serde(rename = "TRANSFER")]
    Transfer {
        from_node: String,
        from_account: String,
        to_node: String,
        to_account: String,
        amount: i64,
    },

    /// Coordinator reply to a client. `success == true` means the transfer
    /// is durably committed at both participants.
    #[serde(rename = "TRANSFER_RESULT")]
    TransferResult {
        success: bool,
        txid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Voting phase of 2PC: can the participant apply these operations?
    #[serde(rename = "PREPARE")]
    Prepare {
        txid: String,
        operations: Vec<Operation>,
    },

    #[serde(rename = "VOTE_COMMIT")]
    VoteCommit { txid: String },

    #[serde(rename = "VOTE_ABORT")]
    VoteAbort { txid: String, reason: String },

    /// Decision phase: apply the operations. Idempotent on repeat delivery.
    #[serde(rename = "COMMIT")]
    Commit {
        txid: String,
        operations: Vec<Operation>,
    },

    /// Decision phase: discard the transaction. Safe for unknown txids.
    #[serde(rename = "ABORT")]
    Abort { txid: String },

    #[serde(rename = "ACK")]
    Ack { txid: String },

    /// Point read of one account's committed balance.
    #[serde(rename = "READ")]
    Read { account_id: String },

    #[serde(rename = "READ_RESULT")]
    ReadResult { account_id: String, balance: i64 },
}
