// Coordinator-side transaction bookkeeping.

use std::collections::BTreeMap;

use crate::protocol::Operation;

/// Lifecycle states of a coordinated transaction.
///
/// Transitions only move forward:
/// Started -> Preparing -> {Committing, Aborting} -> Completed*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Started,
    Preparing,
    Committing,
    Aborting,
    CompletedCommitted,
    CompletedAborted,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxnState::CompletedCommitted | TxnState::CompletedAborted
        )
    }
}

/// Operations grouped by participant id. Ordered so fan-out and log
/// records are deterministic.
pub type NodeOps = BTreeMap<String, Vec<Operation>>;

/// Builds the per-participant operation lists for one transfer: one
/// negative delta at the source, one positive delta at the destination,
/// grouped under a single participant when both accounts live there.
pub fn plan_operations(
    from_node: &str,
    from_account: &str,
    to_node: &str,
    to_account: &str,
    amount: i64,
) -> NodeOps {
    let mut node_ops = NodeOps::new();
    node_ops
        .entry(from_node.to_string())
        .or_default()
        .push(Operation::new(from_account, -amount));
    node_ops
        .entry(to_node.to_string())
        .or_default()
        .push(Operation::new(to_account, amount));
    node_ops
}
