//! Query entry point.

use std::collections::HashSet;
use std::sync::Arc;

use sluice_cluster::TopologyWatch;
use sluice_types::{NodeId, QueryDescriptor, QueryPolicy};
use tracing::{debug, info};

use crate::coordinator::{Coordinator, QueryShared};
use crate::cursor::ResultCursor;
use crate::error::QueryError;
use crate::gate::AdmissionGate;
use crate::queue::record_queue;
use crate::session::{NodeSession, SessionRequest};
use crate::signal::AbortSignal;
use crate::task::TaskTable;

/// Runs queries against a cluster.
///
/// Each [`execute`](Self::execute) call builds its own gate, queue, task
/// table and abort signal, so concurrent queries share nothing but the
/// topology and session.
#[derive(Clone)]
pub struct QueryExecutor {
    topology: Arc<dyn TopologyWatch>,
    session: Arc<dyn NodeSession>,
}

impl QueryExecutor {
    /// Create an executor over `topology`, talking to nodes through `session`.
    pub fn new(topology: Arc<dyn TopologyWatch>, session: Arc<dyn NodeSession>) -> Self {
        Self { topology, session }
    }

    /// Start a query and return a cursor over its records.
    ///
    /// Validates the policy, snapshots the cluster generation and resolves
    /// the target nodes before returning; everything else runs in a spawned
    /// coordinator task. The policy is copied, so later changes to `policy`
    /// do not affect the running query.
    #[tracing::instrument(
        skip(self, descriptor, policy),
        fields(namespace = %descriptor.namespace, set = %descriptor.set)
    )]
    pub async fn execute(
        &self,
        descriptor: QueryDescriptor,
        policy: &QueryPolicy,
    ) -> Result<ResultCursor, QueryError> {
        let policy = policy.clone();
        policy.validate()?;

        let started = self.topology.current_generation().await;
        let nodes = match &descriptor.nodes {
            Some(explicit) => dedup_nodes(explicit),
            None => self.topology.nodes_for(&descriptor.namespace).await,
        };
        if nodes.is_empty() {
            return Err(QueryError::NoNodes {
                namespace: descriptor.namespace.clone(),
            });
        }

        let concurrency = policy.concurrency_for(nodes.len());
        let abort = AbortSignal::new();
        let gate = AdmissionGate::new(concurrency);
        let tasks = TaskTable::new(&nodes);
        let shared = QueryShared::new(tasks, gate, abort.clone());
        let (sender, receiver) = record_queue(policy.record_queue_size, &abort);

        let request = Arc::new(SessionRequest {
            projection: descriptor.effective_projection(&policy),
            descriptor,
        });

        info!(
            nodes = nodes.len(),
            concurrency,
            queue = policy.record_queue_size,
            %started,
            "starting query"
        );
        debug!(?nodes, "query targets");

        let coordinator = Coordinator {
            policy,
            nodes,
            started,
            request,
            topology: self.topology.clone(),
            session: self.session.clone(),
            shared: shared.clone(),
            sender,
        };
        tokio::spawn(coordinator.run());

        Ok(ResultCursor::new(receiver, shared))
    }
}

/// Drop repeated nodes, keeping the first occurrence.
fn dedup_nodes(nodes: &[NodeId]) -> Vec<NodeId> {
    let mut seen = HashSet::with_capacity(nodes.len());
    nodes.iter().copied().filter(|n| seen.insert(*n)).collect()
}
