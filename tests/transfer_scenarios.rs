// End-to-end transfer scenarios over real sockets: a coordinator and
// three participant nodes, each started on an ephemeral port against a
// fresh data directory.

mod common;

use common::*;

const THREE_NODES: &[(&str, &[(&str, i64)])] = &[
    ("N1", &[("A", 100)]),
    ("N2", &[("B", 50)]),
    ("N3", &[("C", 20000)]),
];

const ONE_NODE_TWO_ACCOUNTS: &[(&str, &[(&str, i64)])] = &[("N1", &[("A", 100), ("X", 5)])];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_transfer_commits_on_both_nodes() {
    let cluster = start_cluster(THREE_NODES).await;

    let (success, txid, reason) = transfer(&cluster, "N1", "A", "N2", "B", 10).await;
    assert!(success, "transfer failed: {:?}", reason);

    assert_eq!(read_balance(&cluster, "N1", "A").await, 90);
    assert_eq!(read_balance(&cluster, "N2", "B").await, 60);

    // Source node journaled the debit and the commit marker.
    let n1 = wal_records(&cluster.data_dir, "N1");
    let update = n1
        .iter()
        .find(|r| r["type"] == "update" && r["txid"] == txid.as_str())
        .expect("N1 update record");
    assert_eq!(update["account_id"], "A");
    assert_eq!(update["delta"], -10);
    assert_eq!(update["old_balance"], 100);
    assert_eq!(update["new_balance"], 90);
    assert!(record_types_for(&n1, &txid).contains(&"commit".to_string()));

    // Destination node journaled the credit.
    let n2 = wal_records(&cluster.data_dir, "N2");
    let update = n2
        .iter()
        .find(|r| r["type"] == "update" && r["txid"] == txid.as_str())
        .expect("N2 update record");
    assert_eq!(update["delta"], 10);
    assert_eq!(update["new_balance"], 60);

    // Coordinator log walked every phase to a committed COMPLETE.
    let phases = record_types_for(&decision_records(&cluster.data_dir), &txid);
    assert_eq!(phases, vec!["START", "PREPARE", "COMMIT", "COMPLETE"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_insufficient_funds_aborts_without_changes() {
    let cluster = start_cluster(THREE_NODES).await;

    let (success, txid, reason) = transfer(&cluster, "N1", "A", "N2", "B", 200).await;
    assert!(!success);
    assert_eq!(reason.as_deref(), Some("insufficient_balance"));

    assert_eq!(read_balance(&cluster, "N1", "A").await, 100);
    assert_eq!(read_balance(&cluster, "N2", "B").await, 50);

    let n1 = wal_records(&cluster.data_dir, "N1");
    let refusal = n1
        .iter()
        .find(|r| r["type"] == "prepare_failed" && r["txid"] == txid.as_str())
        .expect("N1 prepare_failed record");
    assert_eq!(refusal["reason"], "insufficient_balance");

    let phases = record_types_for(&decision_records(&cluster.data_dir), &txid);
    assert_eq!(phases, vec!["START", "PREPARE", "ABORT", "COMPLETE"]);
    let records = decision_records(&cluster.data_dir);
    let complete = records
        .iter()
        .find(|r| r["type"] == "COMPLETE" && r["txid"] == txid.as_str())
        .unwrap();
    assert_eq!(complete["status"], "aborted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_conserve_funds() {
    let cluster = start_cluster(THREE_NODES).await;

    // Issue all three at once; a loser of a prepare-time lock race is
    // retried, which is the client-visible contract under contention.
    let (r1, r2, r3) = tokio::join!(
        transfer(&cluster, "N1", "A", "N2", "B", 10),
        transfer(&cluster, "N2", "B", "N1", "A", 10),
        transfer(&cluster, "N3", "C", "N1", "A", 20),
    );

    let attempts = [
        ("N1", "A", "N2", "B", 10, r1),
        ("N2", "B", "N1", "A", 10, r2),
        ("N3", "C", "N1", "A", 20, r3),
    ];
    for (from_node, from_account, to_node, to_account, amount, mut result) in attempts {
        let mut retries = 0;
        while !result.0 {
            retries += 1;
            assert!(
                retries <= 5,
                "transfer {}/{} -> {}/{} kept failing: {:?}",
                from_node,
                from_account,
                to_node,
                to_account,
                result.2
            );
            result = transfer(&cluster, from_node, from_account, to_node, to_account, amount).await;
        }
    }

    assert_eq!(read_balance(&cluster, "N1", "A").await, 120);
    assert_eq!(read_balance(&cluster, "N2", "B").await, 50);
    assert_eq!(read_balance(&cluster, "N3", "C").await, 19980);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conflicting_transfers_never_oversubscribe() {
    let cluster = start_cluster(THREE_NODES).await;

    // Both touch B (balance 50); their combined debit of 150 exceeds it,
    // so at most one of the two B-debiting outcomes can ever apply.
    let (r1, r2) = tokio::join!(
        transfer(&cluster, "N1", "A", "N2", "B", 100),
        transfer(&cluster, "N2", "B", "N3", "C", 150),
    );

    let a = read_balance(&cluster, "N1", "A").await;
    let b = read_balance(&cluster, "N2", "B").await;
    let c = read_balance(&cluster, "N3", "C").await;

    // Funds conserved across the whole ledger regardless of outcomes.
    assert_eq!(a + b + c, 100 + 50 + 20000);
    assert!(b >= 0, "B went negative: {}", b);

    // Each reported outcome matches the observable state.
    let mut expected_a = 100;
    let mut expected_b = 50;
    let mut expected_c = 20000;
    if r1.0 {
        expected_a -= 100;
        expected_b += 100;
    }
    if r2.0 {
        expected_b -= 150;
        expected_c += 150;
    }
    assert_eq!(a, expected_a);
    assert_eq!(b, expected_b);
    assert_eq!(c, expected_c);

    // The second cannot have committed unless the first landed first.
    if r2.0 {
        assert!(r1.0, "B only ever holds 150 after the first transfer");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exact_balance_transfer_reaches_zero() {
    let cluster = start_cluster(THREE_NODES).await;

    let (success, _, reason) = transfer(&cluster, "N2", "B", "N1", "A", 50).await;
    assert!(success, "transfer failed: {:?}", reason);
    assert_eq!(read_balance(&cluster, "N2", "B").await, 0);
    assert_eq!(read_balance(&cluster, "N1", "A").await, 150);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_amount_rejected_as_invalid() {
    let cluster = start_cluster(THREE_NODES).await;

    let (success, txid, reason) = transfer(&cluster, "N1", "A", "N2", "B", 0).await;
    assert!(!success);
    assert_eq!(reason.as_deref(), Some("invalid_request"));
    assert!(txid.is_empty());

    // Rejected before any durable record.
    assert!(decision_records(&cluster.data_dir).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_self_transfer_rejected_as_invalid() {
    let cluster = start_cluster(THREE_NODES).await;

    let (success, _, reason) = transfer(&cluster, "N1", "A", "N1", "A", 10).await;
    assert!(!success);
    assert_eq!(reason.as_deref(), Some("invalid_request"));
    assert_eq!(read_balance(&cluster, "N1", "A").await, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_participant_rejected_as_invalid() {
    let cluster = start_cluster(THREE_NODES).await;

    let (success, _, reason) = transfer(&cluster, "N9", "A", "N2", "B", 10).await;
    assert!(!success);
    assert_eq!(reason.as_deref(), Some("invalid_request"));
    assert!(decision_records(&cluster.data_dir).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_node_transfer_between_accounts() {
    let cluster = start_cluster(ONE_NODE_TWO_ACCOUNTS).await;

    let (success, txid, reason) = transfer(&cluster, "N1", "A", "N1", "X", 30).await;
    assert!(success, "transfer failed: {:?}", reason);
    assert_eq!(read_balance(&cluster, "N1", "A").await, 70);
    assert_eq!(read_balance(&cluster, "N1", "X").await, 35);

    // Both operations grouped under the one participant: two updates,
    // one commit.
    let n1 = wal_records(&cluster.data_dir, "N1");
    let updates = n1
        .iter()
        .filter(|r| r["type"] == "update" && r["txid"] == txid.as_str())
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_read_reflects_committed_delta() {
    let cluster = start_cluster(THREE_NODES).await;

    let before = read_balance(&cluster, "N3", "C").await;
    let (success, _, _) = transfer(&cluster, "N3", "C", "N1", "A", 125).await;
    assert!(success);
    let after = read_balance(&cluster, "N3", "C").await;
    assert_eq!(before - after, 125);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transfer_to_unseen_account_creates_it() {
    let cluster = start_cluster(THREE_NODES).await;

    let (success, _, _) = transfer(&cluster, "N1", "A", "N2", "NEW", 40).await;
    assert!(success);
    assert_eq!(read_balance(&cluster, "N2", "NEW").await, 40);
}
