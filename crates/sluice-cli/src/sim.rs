//! Simulated in-process cluster the binary runs queries against.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sluice_cluster::{ClusterEvent, ClusterView, Member};
use sluice_query::{MemorySession, NodeSession, SessionError, SlowSession};
use sluice_types::{Key, NodeId, Record, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ClusterSection;

/// A built cluster: topology, node sessions and the node IDs in order.
pub struct SimCluster {
    pub view: Arc<ClusterView>,
    pub session: Arc<dyn NodeSession>,
    pub nodes: Vec<NodeId>,
}

/// Deterministic node ID for the `index`-th simulated node (1-based).
pub fn sim_node_id(index: usize) -> NodeId {
    NodeId::from_data(format!("sim-node-{index}").as_bytes())
}

/// Build the cluster described by `[cluster]`.
pub async fn build(section: &ClusterSection) -> SimCluster {
    let view = ClusterView::new();
    tokio::spawn(log_cluster_events(view.subscribe_events()));
    let memory = Arc::new(MemorySession::new());
    let mut nodes = Vec::with_capacity(section.nodes);

    for index in 1..=section.nodes {
        let node = sim_node_id(index);
        view.add_member(Member::alive(node, &[section.namespace.as_str()]))
            .await;
        memory.add_node(node);
        memory.extend(
            node,
            (0..section.records_per_node).map(|seq| sim_record(section, index, seq)),
        );
        if section.failing_nodes.contains(&index) {
            memory.fail_on_open(
                node,
                SessionError::Transport(format!("sim-node-{index} refused connection")),
            );
        }
        nodes.push(node);
    }
    debug!(nodes = nodes.len(), "simulated cluster built");

    let [open_min, open_max] = section.open_latency_ms;
    let [rec_min, rec_max] = section.record_latency_ms;
    let session = SlowSession::new(memory)
        .open_latency(open_min, open_max)
        .record_latency(rec_min, rec_max)
        .seed(section.seed);

    SimCluster {
        view,
        session: Arc::new(session),
        nodes,
    }
}

/// Start a partition migration after `after`, bumping the generation.
pub fn schedule_migration(view: Arc<ClusterView>, after: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        info!(after_ms = after.as_millis() as u64, "simulating partition migration");
        view.begin_migration();
    });
}

/// Log membership churn until the cluster view goes away. Returns the number
/// of events seen.
async fn log_cluster_events(mut events: broadcast::Receiver<ClusterEvent>) -> usize {
    let mut seen = 0usize;
    loop {
        match events.recv().await {
            Ok(ClusterEvent::MigrationStarted) => {
                info!("cluster event: partition migration started");
            }
            Ok(event) => debug!(?event, "cluster event"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "cluster event log lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return seen,
        }
        seen += 1;
    }
}

fn sim_record(section: &ClusterSection, index: usize, seq: usize) -> Record {
    let id = (index * 1_000_000 + seq) as i64;
    let mut bins = BTreeMap::new();
    bins.insert("node".to_string(), Value::Int(index as i64));
    bins.insert("seq".to_string(), Value::Int(seq as i64));
    bins.insert("value".to_string(), Value::from(format!("record-{id}")));
    Record::new(Key::new(&section.namespace, &section.set, id), bins)
}
