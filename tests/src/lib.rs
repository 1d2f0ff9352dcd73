//! Shared test harness for Sluice integration tests.
//!
//! Provides [`IntegrationCluster`]: an N-node cluster with an in-process
//! topology and a mock node session that exercises the full query path
//! (admission, node workers, bounded queue, cursor) with failure injection.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use sluice_cluster::{ClusterView, Member};
use sluice_query::{
    MemorySession, NodeSession, QueryExecutor, RecordStream, SessionError, SessionRequest,
    SlowSession,
};
use sluice_types::*;
use tokio::sync::RwLock;

/// Namespace every test node serves.
pub const NAMESPACE: &str = "test";

/// Set every test record is written to.
pub const SET: &str = "items";

// =========================================================================
// Mock session
// =========================================================================

/// Node session that routes queries to per-node in-memory record sets.
///
/// Supports failure injection: nodes in `down_nodes` refuse new sessions
/// and break open streams before their next record.
struct MockSession {
    memory: Arc<MemorySession>,
    down_nodes: Arc<RwLock<HashSet<NodeId>>>,
}

#[async_trait]
impl NodeSession for MockSession {
    async fn open(
        &self,
        node: NodeId,
        request: &SessionRequest,
    ) -> Result<Box<dyn RecordStream>, SessionError> {
        if self.down_nodes.read().await.contains(&node) {
            return Err(SessionError::Transport("node is down".into()));
        }
        let inner = self.memory.open(node, request).await?;
        Ok(Box::new(MockStream {
            node,
            inner,
            down_nodes: self.down_nodes.clone(),
        }))
    }
}

struct MockStream {
    node: NodeId,
    inner: Box<dyn RecordStream>,
    down_nodes: Arc<RwLock<HashSet<NodeId>>>,
}

#[async_trait]
impl RecordStream for MockStream {
    async fn next_record(&mut self) -> Result<Option<Record>, SessionError> {
        if self.down_nodes.read().await.contains(&self.node) {
            return Err(SessionError::Transport("connection reset".into()));
        }
        self.inner.next_record().await
    }
}

// =========================================================================
// IntegrationCluster
// =========================================================================

/// A simulated N-node cluster for integration tests.
///
/// Every node serves [`NAMESPACE`] and holds `records_per_node` records in
/// [`SET`], tagged with the node index and a per-node sequence number.
pub struct IntegrationCluster {
    node_ids: Vec<NodeId>,
    view: Arc<ClusterView>,
    memory: Arc<MemorySession>,
    session: Arc<MockSession>,
    down_nodes: Arc<RwLock<HashSet<NodeId>>>,
    records_per_node: usize,
}

impl IntegrationCluster {
    /// Create an N-node cluster with `records_per_node` records on each node.
    pub async fn new(n: usize, records_per_node: usize) -> Self {
        let view = ClusterView::new();
        let memory = Arc::new(MemorySession::new());
        let down_nodes = Arc::new(RwLock::new(HashSet::new()));

        let mut node_ids = Vec::with_capacity(n);
        for i in 0..n {
            let node_id = NodeId::from_data(format!("it-node-{i}").as_bytes());
            view.add_member(Member::alive(node_id, &[NAMESPACE])).await;
            memory.add_node(node_id);
            memory.extend(
                node_id,
                (0..records_per_node).map(|seq| test_record(i, seq as i64)),
            );
            node_ids.push(node_id);
        }

        let session = Arc::new(MockSession {
            memory: memory.clone(),
            down_nodes: down_nodes.clone(),
        });

        Self {
            node_ids,
            view,
            memory,
            session,
            down_nodes,
            records_per_node,
        }
    }

    /// Executor talking to the nodes directly.
    pub fn executor(&self) -> QueryExecutor {
        QueryExecutor::new(self.view.clone(), self.session.clone())
    }

    /// Executor whose sessions add seeded random latency (ms ranges).
    pub fn slow_executor(&self, open_ms: (u64, u64), record_ms: (u64, u64), seed: u64) -> QueryExecutor {
        let slow = SlowSession::new(self.session.clone())
            .open_latency(open_ms.0, open_ms.1)
            .record_latency(record_ms.0, record_ms.1)
            .seed(seed);
        QueryExecutor::new(self.view.clone(), Arc::new(slow))
    }

    /// The cluster topology.
    pub fn view(&self) -> &Arc<ClusterView> {
        &self.view
    }

    /// Direct access to the record sets, for failure injection.
    pub fn memory(&self) -> &MemorySession {
        &self.memory
    }

    /// Get the NodeId for node `i`.
    pub fn node_id(&self, i: usize) -> NodeId {
        self.node_ids[i]
    }

    /// Index of `node`, if it belongs to this cluster.
    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        self.node_ids.iter().position(|&n| n == node)
    }

    /// Number of nodes in the cluster.
    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    /// Whether the cluster has no nodes.
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    /// Records each node holds.
    pub fn records_per_node(&self) -> usize {
        self.records_per_node
    }

    /// Current topology generation.
    pub fn generation(&self) -> ClusterGeneration {
        self.view.generation()
    }

    /// Mark a node as "down": it is declared dead, then sessions to it fail.
    pub async fn kill_node(&self, i: usize) {
        self.view.mark_dead(&self.node_ids[i]).await;
        self.down_nodes.write().await.insert(self.node_ids[i]);
    }

    /// Fail sessions to node `i` without telling the topology.
    pub async fn partition_node(&self, i: usize) {
        self.down_nodes.write().await.insert(self.node_ids[i]);
    }

    /// Mark a node as "alive" again after being killed or partitioned.
    pub async fn revive_node(&self, i: usize) {
        self.down_nodes.write().await.remove(&self.node_ids[i]);
        self.view
            .add_member(Member::alive(self.node_ids[i], &[NAMESPACE]))
            .await;
    }

    /// Descriptor for a full scan of the test set.
    pub fn scan(&self) -> QueryDescriptor {
        QueryDescriptor::new(NAMESPACE, SET)
    }
}

// =========================================================================
// Records
// =========================================================================

/// Record number `seq` of node `node_index`.
pub fn test_record(node_index: usize, seq: i64) -> Record {
    let mut bins = BTreeMap::new();
    bins.insert("node".to_string(), Value::Int(node_index as i64));
    bins.insert("seq".to_string(), Value::Int(seq));
    bins.insert("payload".to_string(), Value::from(format!("{node_index}:{seq}")));
    Record::new(
        Key::new(NAMESPACE, SET, (node_index as i64) * 1_000_000 + seq),
        bins,
    )
}

/// The `seq` bin of a test record.
pub fn seq_of(record: &Record) -> i64 {
    record
        .bin("seq")
        .and_then(Value::as_int)
        .expect("test record without seq bin")
}

/// Policy with the given concurrency and queue size, other fields default.
pub fn policy(max_concurrent_nodes: usize, record_queue_size: usize) -> QueryPolicy {
    QueryPolicy {
        max_concurrent_nodes,
        record_queue_size,
        ..QueryPolicy::default()
    }
}

/// Check that each node's records arrived in sequence order. Returns the
/// number of records seen per node.
pub fn assert_per_node_order(records: &[(NodeId, Record)]) -> BTreeMap<NodeId, usize> {
    let mut last: BTreeMap<NodeId, i64> = BTreeMap::new();
    let mut counts: BTreeMap<NodeId, usize> = BTreeMap::new();
    for (node, record) in records {
        let seq = seq_of(record);
        let expected = last.get(node).map_or(0, |prev| prev + 1);
        assert_eq!(seq, expected, "node {node:?} delivered {seq}, expected {expected}");
        last.insert(*node, seq);
        *counts.entry(*node).or_default() += 1;
    }
    counts
}
