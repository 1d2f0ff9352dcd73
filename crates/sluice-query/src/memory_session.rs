//! In-memory node session.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::RwLock;

use sluice_types::{NodeId, Record};
use tracing::debug;

use crate::error::SessionError;
use crate::session::{NodeSession, RecordStream, SessionRequest};

#[derive(Default)]
struct NodeData {
    records: Vec<Record>,
    failure: Option<InjectedFailure>,
}

#[derive(Clone)]
struct InjectedFailure {
    /// Records delivered before the error; `None` fails the open itself.
    after: Option<usize>,
    error: SessionError,
}

/// [`NodeSession`] serving per-node record sets held in memory.
///
/// Applies the descriptor's set and filter and the request's projection, the
/// way a server node would. Nodes with no records registered are treated as
/// unreachable. Failures can be injected per node for testing.
pub struct MemorySession {
    nodes: RwLock<HashMap<NodeId, NodeData>>,
}

impl MemorySession {
    /// Create a session with no nodes.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Register `node` with no records. Queries against it succeed empty.
    pub fn add_node(&self, node: NodeId) {
        self.nodes
            .write()
            .expect("lock poisoned")
            .entry(node)
            .or_default();
    }

    /// Store a record on `node`, registering the node if needed.
    pub fn insert(&self, node: NodeId, record: Record) {
        self.extend(node, [record]);
    }

    /// Store several records on `node`, in order.
    pub fn extend(&self, node: NodeId, records: impl IntoIterator<Item = Record>) {
        let mut nodes = self.nodes.write().expect("lock poisoned");
        nodes.entry(node).or_default().records.extend(records);
    }

    /// Make every query against `node` fail when it is opened.
    pub fn fail_on_open(&self, node: NodeId, error: SessionError) {
        self.inject(node, None, error);
    }

    /// Make `node` fail after delivering `records` records.
    pub fn fail_after(&self, node: NodeId, records: usize, error: SessionError) {
        self.inject(node, Some(records), error);
    }

    /// Remove any injected failure from `node`.
    pub fn heal(&self, node: NodeId) {
        if let Some(data) = self.nodes.write().expect("lock poisoned").get_mut(&node) {
            data.failure = None;
        }
    }

    /// Number of records stored on `node`.
    pub fn record_count(&self, node: NodeId) -> usize {
        self.nodes
            .read()
            .expect("lock poisoned")
            .get(&node)
            .map_or(0, |d| d.records.len())
    }

    fn inject(&self, node: NodeId, after: Option<usize>, error: SessionError) {
        let mut nodes = self.nodes.write().expect("lock poisoned");
        nodes.entry(node).or_default().failure = Some(InjectedFailure { after, error });
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl NodeSession for MemorySession {
    async fn open(
        &self,
        node: NodeId,
        request: &SessionRequest,
    ) -> Result<Box<dyn RecordStream>, SessionError> {
        let nodes = self.nodes.read().expect("lock poisoned");
        let data = nodes
            .get(&node)
            .ok_or_else(|| SessionError::Transport(format!("node {node} is not reachable")))?;

        let failure = data.failure.clone();
        if let Some(InjectedFailure { after: None, error }) = failure {
            return Err(error);
        }

        let records: VecDeque<Record> = data
            .records
            .iter()
            .filter(|r| request.descriptor.selects(r))
            .cloned()
            .map(|mut r| {
                request.projection.apply(&mut r);
                r
            })
            .collect();
        debug!(%node, matched = records.len(), "memory session opened");

        Ok(Box::new(MemoryStream {
            records,
            delivered: 0,
            failure: failure.and_then(|f| f.after.map(|after| (after, f.error))),
        }))
    }
}

struct MemoryStream {
    records: VecDeque<Record>,
    delivered: usize,
    failure: Option<(usize, SessionError)>,
}

#[async_trait::async_trait]
impl RecordStream for MemoryStream {
    async fn next_record(&mut self) -> Result<Option<Record>, SessionError> {
        if let Some((after, error)) = &self.failure {
            if self.delivered >= *after {
                return Err(error.clone());
            }
        }
        // Yield so a large in-memory set does not monopolize the runtime.
        tokio::task::yield_now().await;
        let next = self.records.pop_front();
        if next.is_some() {
            self.delivered += 1;
        }
        Ok(next)
    }
}
