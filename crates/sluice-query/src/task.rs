//! Per-node task tracking and the query's lifecycle state.

use std::sync::{Arc, Mutex};

use sluice_types::NodeId;

use crate::error::{NodeError, QueryError};
use crate::signal::AbortReason;

/// Execution state of one node's query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTaskStatus {
    /// Waiting for an admission slot.
    Pending,
    /// Admitted and streaming.
    Running,
    /// Stream finished normally.
    Succeeded,
    /// Session failed.
    Failed(NodeError),
    /// Stopped by an abort before finishing.
    Cancelled,
}

impl NodeTaskStatus {
    /// Whether the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeTaskStatus::Succeeded | NodeTaskStatus::Failed(_) | NodeTaskStatus::Cancelled
        )
    }
}

/// Snapshot of one node's task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTask {
    /// Target node.
    pub node: NodeId,
    /// Current status.
    pub status: NodeTaskStatus,
    /// Records pushed into the result queue so far.
    pub records: u64,
}

/// Shared table of every target node's task, in admission order.
#[derive(Clone)]
pub struct TaskTable {
    tasks: Arc<Mutex<Vec<NodeTask>>>,
}

impl TaskTable {
    /// One `Pending` task per node.
    pub fn new(nodes: &[NodeId]) -> Self {
        let tasks = nodes
            .iter()
            .map(|&node| NodeTask {
                node,
                status: NodeTaskStatus::Pending,
                records: 0,
            })
            .collect();
        Self {
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    /// Move a task to `status`. Terminal statuses are sticky; returns `false`
    /// when the update was refused.
    pub fn set_status(&self, node: NodeId, status: NodeTaskStatus) -> bool {
        let mut tasks = self.tasks.lock().expect("task table lock poisoned");
        match tasks.iter_mut().find(|t| t.node == node) {
            Some(task) if !task.status.is_terminal() => {
                task.status = status;
                true
            }
            _ => false,
        }
    }

    /// Count one more record delivered by `node`.
    pub fn record_pushed(&self, node: NodeId) {
        let mut tasks = self.tasks.lock().expect("task table lock poisoned");
        if let Some(task) = tasks.iter_mut().find(|t| t.node == node) {
            task.records += 1;
        }
    }

    /// Cancel every task that has not been admitted yet.
    pub fn cancel_pending(&self) -> usize {
        let mut tasks = self.tasks.lock().expect("task table lock poisoned");
        let mut cancelled = 0;
        for task in tasks.iter_mut() {
            if task.status == NodeTaskStatus::Pending {
                task.status = NodeTaskStatus::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Number of tasks currently `Running`.
    pub fn running(&self) -> usize {
        let tasks = self.tasks.lock().expect("task table lock poisoned");
        tasks
            .iter()
            .filter(|t| t.status == NodeTaskStatus::Running)
            .count()
    }

    /// Copy of every task.
    pub fn snapshot(&self) -> Vec<NodeTask> {
        self.tasks.lock().expect("task table lock poisoned").clone()
    }
}

/// Lifecycle of a scatter-gather query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    /// Validating the policy and snapshotting topology.
    Initializing,
    /// Admitting nodes and starting workers.
    Scattering,
    /// All nodes admitted; waiting for workers to finish.
    Gathering,
    /// Every node succeeded.
    Completed,
    /// Every node finished and at least one failed.
    PartialFailure,
    /// Stopped early.
    Aborted,
}

impl QueryPhase {
    /// Terminal phases never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueryPhase::Completed | QueryPhase::PartialFailure | QueryPhase::Aborted
        )
    }

    /// Apply a transition, refusing to leave a terminal phase.
    pub fn advance(&mut self, next: QueryPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        *self = next;
        true
    }
}

/// Aggregate result of a query, decided once by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Every node succeeded.
    Completed,
    /// Some nodes failed; their errors in the order they were reaped.
    PartialFailure(Vec<NodeError>),
    /// The query stopped early.
    Aborted(AbortReason),
}

impl QueryOutcome {
    /// The terminal phase matching this outcome.
    pub fn phase(&self) -> QueryPhase {
        match self {
            QueryOutcome::Completed => QueryPhase::Completed,
            QueryOutcome::PartialFailure(_) => QueryPhase::PartialFailure,
            QueryOutcome::Aborted(_) => QueryPhase::Aborted,
        }
    }

    /// `Ok` for a completed query, the caller-facing error otherwise.
    pub fn into_result(self) -> Result<(), QueryError> {
        match self {
            QueryOutcome::Completed => Ok(()),
            QueryOutcome::PartialFailure(errors) => Err(QueryError::PartialFailure(errors)),
            QueryOutcome::Aborted(reason) => Err(reason.into()),
        }
    }
}
