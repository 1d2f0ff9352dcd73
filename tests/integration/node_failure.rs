//! Integration test: node failure.
//!
//! Failed nodes are reported once every other node has delivered its
//! records. Queries never retry a node.

use std::time::Duration;

use sluice_integration_tests::{IntegrationCluster, assert_per_node_order, policy};
use sluice_query::{NodeTaskStatus, QueryError, QueryOutcome, SessionError};
use sluice_types::QueryPolicy;

/// A node declared dead before the query starts is simply not targeted.
#[tokio::test]
async fn test_dead_node_not_targeted() {
    let c = IntegrationCluster::new(5, 40).await;
    c.kill_node(2).await;

    let mut cursor = c
        .executor()
        .execute(c.scan(), &QueryPolicy::default())
        .await
        .unwrap();
    let (records, result) = cursor.collect_all().await;

    assert_eq!(result, Ok(()));
    assert_eq!(records.len(), 4 * 40);
    assert_eq!(cursor.tasks().len(), 4);
}

/// 3 nodes: 10 and 15 records, the third refuses the connection. The
/// consumer gets all 25 records, then a partial failure naming the node.
#[tokio::test]
async fn test_partial_failure_after_all_records() {
    let c = IntegrationCluster::new(3, 15).await;
    c.memory()
        .fail_after(c.node_id(0), 10, SessionError::Transport("timeout".into()));
    c.memory().fail_on_open(
        c.node_id(2),
        SessionError::Transport("connection refused".into()),
    );

    let mut cursor = c
        .executor()
        .execute(c.scan(), &QueryPolicy::default())
        .await
        .unwrap();
    let mut records = Vec::new();
    let err = loop {
        match cursor.next_from().await {
            Ok(Some(item)) => records.push(item),
            Ok(None) => panic!("expected a partial failure"),
            Err(e) => break e,
        }
    };

    assert_eq!(records.len(), 25);
    assert_per_node_order(&records);
    let QueryError::PartialFailure(errors) = err else {
        panic!("expected PartialFailure, got {err:?}");
    };
    let mut failed: Vec<_> = errors.iter().map(|e| e.node).collect();
    failed.sort();
    let mut expected = vec![c.node_id(0), c.node_id(2)];
    expected.sort();
    assert_eq!(failed, expected);
}

/// A node partitioned mid-query fails alone; the rest complete.
#[tokio::test]
async fn test_partition_mid_query_is_partial_failure() {
    let c = IntegrationCluster::new(4, 500).await;
    let executor = c.slow_executor((0, 0), (1, 1), 5);

    let mut cursor = executor.execute(c.scan(), &policy(0, 32)).await.unwrap();
    for _ in 0..10 {
        cursor.next().await.unwrap().unwrap();
    }
    // Cut node 3 off without a topology change.
    c.partition_node(3).await;

    let (records, result) = tokio::time::timeout(Duration::from_secs(30), cursor.collect_all())
        .await
        .unwrap();
    let Err(QueryError::PartialFailure(errors)) = result else {
        panic!("expected PartialFailure, got {result:?}");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].node, c.node_id(3));
    assert!(records.len() + 10 < 4 * 500);
    assert!(records.len() + 10 >= 3 * 500);

    let tasks = cursor.tasks();
    let succeeded = tasks
        .iter()
        .filter(|t| t.status == NodeTaskStatus::Succeeded)
        .count();
    assert_eq!(succeeded, 3);
}

/// With `fail_on_cluster_change`, a node dying mid-query aborts the whole
/// query, after the records already produced are delivered.
#[tokio::test]
async fn test_node_death_aborts_watched_query() {
    let c = IntegrationCluster::new(6, 1000).await;
    let executor = c.slow_executor((0, 0), (1, 2), 9);
    let started = c.generation();
    let policy = QueryPolicy {
        max_concurrent_nodes: 3,
        fail_on_cluster_change: true,
        ..QueryPolicy::default()
    };

    let mut cursor = executor.execute(c.scan(), &policy).await.unwrap();
    let mut records = Vec::new();
    for _ in 0..20 {
        records.push(cursor.next_from().await.unwrap().unwrap());
    }
    c.kill_node(0).await;

    let err = loop {
        match tokio::time::timeout(Duration::from_secs(10), cursor.next_from())
            .await
            .unwrap()
        {
            Ok(Some(item)) => records.push(item),
            Ok(None) => panic!("query completed despite a node dying"),
            Err(e) => break e,
        }
    };

    assert_eq!(
        err,
        QueryError::ClusterChanged {
            started,
            observed: started.next(),
        }
    );
    assert_per_node_order(&records);
    assert!(records.len() < 6000);
    assert!(matches!(
        cursor.outcome(),
        Some(QueryOutcome::Aborted(_))
    ));
    // The three nodes never admitted stay unqueried.
    let cancelled = cursor
        .tasks()
        .iter()
        .filter(|t| t.status == NodeTaskStatus::Cancelled && t.records == 0)
        .count();
    assert!(cancelled >= 3);
    assert_eq!(cursor.admission_gate().in_use(), 0);
}

/// Without the flag, the same death just fails that node.
#[tokio::test]
async fn test_node_death_without_flag_is_partial_failure() {
    let c = IntegrationCluster::new(3, 1000).await;
    let executor = c.slow_executor((0, 0), (1, 1), 2);

    let mut cursor = executor.execute(c.scan(), &policy(0, 16)).await.unwrap();
    for _ in 0..5 {
        cursor.next().await.unwrap().unwrap();
    }
    c.kill_node(1).await;

    let (_, result) = tokio::time::timeout(Duration::from_secs(30), cursor.collect_all())
        .await
        .unwrap();
    let Err(QueryError::PartialFailure(errors)) = result else {
        panic!("expected PartialFailure, got {result:?}");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].node, c.node_id(1));
}
