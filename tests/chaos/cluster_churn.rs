//! Chaos test: continuous partition migrations against watched queries.
//!
//! Queries with `fail_on_cluster_change` race a background task that keeps
//! bumping the cluster generation. Each query must either complete with
//! every record or abort with `ClusterChanged`, never anything else, and
//! never hang.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use sluice_cluster::ClusterEvent;
use sluice_integration_tests::{IntegrationCluster, assert_per_node_order};
use sluice_query::{NodeTaskStatus, QueryError, QueryPhase};
use sluice_types::QueryPolicy;
use tokio::time;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_watched_queries_under_migration_churn() {
    let c = Arc::new(IntegrationCluster::new(6, 200).await);
    let executor = c.slow_executor((0, 2), (0, 1), 99);

    // Count the migrations the cluster announces while the test runs.
    let migrations = Arc::new(AtomicUsize::new(0));
    let mut events = c.view().subscribe_events();
    let watcher = {
        let migrations = migrations.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if event == ClusterEvent::MigrationStarted {
                    migrations.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
    };

    let stop = Arc::new(AtomicBool::new(false));
    let churn = {
        let cluster = c.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut tick = 0u64;
            while !stop.load(Ordering::Relaxed) {
                // Quiet periods let some queries finish cleanly.
                let pause = if tick % 4 == 0 { 400 } else { 25 };
                time::sleep(Duration::from_millis(pause)).await;
                cluster.view().begin_migration();
                tick += 1;
            }
            tick
        })
    };

    let mut completed = 0usize;
    let mut aborted = 0usize;
    for round in 0..30usize {
        let policy = QueryPolicy {
            max_concurrent_nodes: round % 4,
            record_queue_size: 8 + round,
            fail_on_cluster_change: true,
            ..QueryPolicy::default()
        };
        let mut cursor = executor.execute(c.scan(), &policy).await.unwrap();

        let mut records = Vec::new();
        let result = loop {
            match time::timeout(Duration::from_secs(20), cursor.next_from())
                .await
                .expect("query hung")
            {
                Ok(Some(item)) => records.push(item),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        assert_per_node_order(&records);
        assert_eq!(cursor.admission_gate().in_use(), 0);

        match result {
            Ok(()) => {
                assert_eq!(records.len(), c.len() * c.records_per_node());
                assert_eq!(cursor.phase(), QueryPhase::Completed);
                completed += 1;
            }
            Err(QueryError::ClusterChanged { started, observed }) => {
                assert_ne!(started, observed);
                assert_eq!(cursor.phase(), QueryPhase::Aborted);
                // No task is left pending or running after the abort.
                assert!(cursor.tasks().iter().all(|t| matches!(
                    t.status,
                    NodeTaskStatus::Succeeded | NodeTaskStatus::Cancelled
                )));
                aborted += 1;
            }
            Err(e) => panic!("unexpected query error: {e}"),
        }
    }

    stop.store(true, Ordering::Relaxed);
    let ticks = churn.await.unwrap();

    // Every migration reached event subscribers.
    time::timeout(Duration::from_secs(5), async {
        while migrations.load(Ordering::Relaxed) < ticks as usize {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("migration events were lost");
    assert_eq!(migrations.load(Ordering::Relaxed), ticks as usize);
    watcher.abort();

    assert_eq!(completed + aborted, 30);
    assert!(aborted > 0, "churn never aborted a query");
}
