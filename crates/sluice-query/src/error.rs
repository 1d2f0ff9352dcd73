//! Error types for query execution.

use std::time::Duration;

use sluice_types::{ClusterGeneration, NodeId, PolicyError};

use crate::signal::AbortReason;

/// Errors a node session can report. Both kinds are confined to one node and
/// never abort the query on their own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The node was unreachable or the connection timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node rejected the query.
    #[error("server error {code}: {message}")]
    Server {
        /// Server result code.
        code: i32,
        /// Server-provided description.
        message: String,
    },
}

/// A session failure tagged with the node it came from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("node {node}: {source}")]
pub struct NodeError {
    /// The node whose session failed.
    pub node: NodeId,
    /// What went wrong.
    pub source: SessionError,
}

/// Errors surfaced to the caller of a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The query policy holds an invalid value.
    #[error("invalid query policy: {0}")]
    Configuration(#[from] PolicyError),

    /// No node serves the requested namespace.
    #[error("no nodes available for namespace {namespace}")]
    NoNodes {
        /// The namespace that was queried.
        namespace: String,
    },

    /// The cluster topology changed while the query ran and the policy asked
    /// to fail in that case.
    #[error("cluster changed during query: {started} -> {observed}")]
    ClusterChanged {
        /// Generation snapshotted when the query started.
        started: ClusterGeneration,
        /// Generation observed when the change was detected.
        observed: ClusterGeneration,
    },

    /// The consumer cancelled the query.
    #[error("query cancelled by consumer")]
    ConsumerCancelled,

    /// The query exceeded its total timeout.
    #[error("query timed out after {0:?}")]
    TimedOut(Duration),

    /// One or more nodes failed. Records from the other nodes were delivered.
    #[error("query failed on {} node(s)", .0.len())]
    PartialFailure(Vec<NodeError>),

    /// The coordinator hit an unrecoverable internal error.
    #[error("internal query error: {0}")]
    Internal(String),
}

impl From<AbortReason> for QueryError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::ClusterChanged { started, observed } => {
                QueryError::ClusterChanged { started, observed }
            }
            AbortReason::ConsumerCancelled => QueryError::ConsumerCancelled,
            AbortReason::TimedOut(after) => QueryError::TimedOut(after),
            AbortReason::Internal(msg) => QueryError::Internal(msg),
        }
    }
}
