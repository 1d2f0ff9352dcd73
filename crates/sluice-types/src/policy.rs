//! Query policy: the configuration surface of the scatter-gather engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default capacity of the record queue between node workers and the consumer.
pub const DEFAULT_RECORD_QUEUE_SIZE: usize = 5000;

/// Errors produced when validating a [`QueryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The record queue must hold at least one record.
    #[error("record_queue_size must be greater than 0")]
    ZeroQueueSize,

    /// Queries are never retried; a retry count was configured anyway.
    #[error("max_retries must be 0 for queries, got {0}")]
    RetriesNotSupported(u32),
}

/// Policy attributes for query operations.
///
/// The engine clones the policy when a query starts, so mutating the
/// caller's copy afterwards never affects an in-flight query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPolicy {
    /// Maximum number of nodes queried concurrently.
    ///
    /// With 16 nodes and a limit of 8, eight nodes are queried in parallel and
    /// each completion admits the next node until all 16 have been queried.
    /// `0` queries every node at once.
    pub max_concurrent_nodes: usize,

    /// Number of records buffered before node workers block.
    pub record_queue_size: usize,

    /// Whether bin data is retrieved. When false only digests (and user keys
    /// if stored on the server) are returned.
    pub include_bin_data: bool,

    /// Abort the query if the cluster topology changes while it runs.
    pub fail_on_cluster_change: bool,

    /// Retry count. Queries do not retry, so this must stay 0.
    pub max_retries: u32,

    /// Overall deadline for the query in milliseconds. `0` disables it.
    pub total_timeout_ms: u64,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 0,
            record_queue_size: DEFAULT_RECORD_QUEUE_SIZE,
            include_bin_data: true,
            fail_on_cluster_change: false,
            max_retries: 0,
            total_timeout_ms: 0,
        }
    }
}

impl QueryPolicy {
    /// Check that every attribute holds a usable value.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.record_queue_size == 0 {
            return Err(PolicyError::ZeroQueueSize);
        }
        if self.max_retries != 0 {
            return Err(PolicyError::RetriesNotSupported(self.max_retries));
        }
        Ok(())
    }

    /// Number of nodes allowed to run at once for a query over `node_count` nodes.
    pub fn concurrency_for(&self, node_count: usize) -> usize {
        if self.max_concurrent_nodes == 0 {
            node_count
        } else {
            self.max_concurrent_nodes.min(node_count)
        }
    }

    /// The total timeout, if one is configured.
    pub fn total_timeout(&self) -> Option<Duration> {
        (self.total_timeout_ms > 0).then(|| Duration::from_millis(self.total_timeout_ms))
    }
}
