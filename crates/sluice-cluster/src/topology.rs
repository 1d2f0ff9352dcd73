//! The topology interface consumed by the query engine.

use sluice_types::{ClusterGeneration, NodeId};
use tokio::sync::watch;

/// Read access to cluster topology.
///
/// The query engine snapshots the generation and node list when a query
/// starts and re-reads the generation while it runs; it never holds on to
/// mutable cluster state. Implementations must be `Send + Sync` so one watch
/// can serve many concurrent queries.
#[async_trait::async_trait]
pub trait TopologyWatch: Send + Sync {
    /// The generation of the topology right now.
    async fn current_generation(&self) -> ClusterGeneration;

    /// Alive nodes serving `namespace`, in a stable order.
    async fn nodes_for(&self, namespace: &str) -> Vec<NodeId>;

    /// A receiver that is notified each time the generation changes.
    fn subscribe(&self) -> watch::Receiver<ClusterGeneration>;
}
