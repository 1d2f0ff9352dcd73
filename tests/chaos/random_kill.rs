//! Chaos test: random node kill/restart under query load.
//!
//! 7-node cluster. Background query loops run continuously with slow,
//! jittery sessions. Every few hundred milliseconds a node is killed and
//! revived shortly after. Every query must terminate, keep per-node order,
//! respect its concurrency bound and give back every admission slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use sluice_integration_tests::{IntegrationCluster, assert_per_node_order, policy};
use sluice_query::{NodeTaskStatus, QueryError, SessionError};
use tokio::time;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_kill_queries_always_terminate() {
    let c = Arc::new(IntegrationCluster::new(7, 300).await);

    let stop = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicUsize::new(0));
    let partial = Arc::new(AtomicUsize::new(0));

    // --- Background query loops (4 tasks) ---
    let mut handles = Vec::new();
    for worker in 0..4usize {
        let cluster = c.clone();
        let stop = stop.clone();
        let completed = completed.clone();
        let partial = partial.clone();
        handles.push(tokio::spawn(async move {
            let executor = cluster.slow_executor((0, 3), (0, 1), worker as u64);
            let mut round = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let k = (worker + round) % 4;
                let queue = 1 + (round * 7) % 32;
                let mut cursor = match executor.execute(cluster.scan(), &policy(k, queue)).await {
                    Ok(cursor) => cursor,
                    // Every node may be dead for a moment.
                    Err(QueryError::NoNodes { .. }) => continue,
                    Err(e) => panic!("unexpected start error: {e}"),
                };

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

                let counts = assert_per_node_order(&records);
                let gate = cursor.admission_gate();
                assert_eq!(gate.in_use(), 0, "slots leaked");
                if k > 0 {
                    assert!(gate.high_water() <= k, "bound {k} exceeded");
                }

                match result {
                    Ok(()) => {
                        // A clean run delivered every targeted node in full.
                        for task in cursor.tasks() {
                            assert_eq!(task.status, NodeTaskStatus::Succeeded);
                            assert_eq!(
                                counts.get(&task.node).copied().unwrap_or(0),
                                cluster.records_per_node()
                            );
                        }
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(QueryError::PartialFailure(errors)) => {
                        assert!(!errors.is_empty());
                        for e in &errors {
                            assert!(matches!(e.source, SessionError::Transport(_)));
                        }
                        partial.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected query error: {e}"),
                }
                round += 1;
            }
        }));
    }

    // --- Chaos: kill/restart nodes ---
    let chaos_duration = Duration::from_secs(4);
    let kill_interval = Duration::from_millis(400);
    let restart_delay = Duration::from_millis(150);
    let deadline = time::Instant::now() + chaos_duration;

    let mut kill_idx = 0usize;
    while time::Instant::now() < deadline {
        // Pick a "random" node (deterministic for reproducibility).
        let target = (kill_idx * 3 + 1) % c.len();
        c.kill_node(target).await;
        time::sleep(restart_delay).await;
        c.revive_node(target).await;
        kill_idx += 1;
        time::sleep(kill_interval - restart_delay).await;
    }

    // --- Stop background tasks ---
    stop.store(true, Ordering::Relaxed);
    for h in handles {
        h.await.unwrap();
    }

    let completed = completed.load(Ordering::Relaxed);
    let partial = partial.load(Ordering::Relaxed);
    assert!(
        completed + partial >= 4,
        "too few queries finished: {completed} completed, {partial} partial"
    );

    // --- Verification: with every node back, a query sees everything ---
    let mut cursor = c
        .executor()
        .execute(c.scan(), &policy(3, 64))
        .await
        .unwrap();
    let (records, result) = cursor.collect_all().await;
    assert_eq!(result, Ok(()));
    assert_eq!(records.len(), c.len() * c.records_per_node());
}
