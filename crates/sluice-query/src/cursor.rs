//! Result cursor: the caller's pull interface over a running query.

use std::sync::Arc;

use sluice_types::{NodeId, Record};
use tracing::{debug, trace};

use crate::coordinator::QueryShared;
use crate::error::QueryError;
use crate::gate::AdmissionGate;
use crate::queue::{Drained, RecordReceiver, ResultEnvelope};
use crate::signal::{AbortReason, AbortSignal};
use crate::task::{NodeTask, QueryOutcome, QueryPhase};

/// Pull-based, single-pass iterator over a query's records.
///
/// Records arrive in the order the queue received them: each node's records
/// keep their order, records from different nodes interleave. Once the queue
/// is exhausted the query's outcome is reported exactly once, as `Ok(None)`
/// for a completed query or as an error otherwise. Every later call returns
/// `Ok(None)`.
///
/// Dropping the cursor before the query finishes cancels it.
pub struct ResultCursor {
    receiver: RecordReceiver,
    shared: Arc<QueryShared>,
    done: bool,
}

impl ResultCursor {
    pub(crate) fn new(receiver: RecordReceiver, shared: Arc<QueryShared>) -> Self {
        Self {
            receiver,
            shared,
            done: false,
        }
    }

    /// Next record, or `Ok(None)` once a completed query is exhausted.
    pub async fn next(&mut self) -> Result<Option<Record>, QueryError> {
        Ok(self.next_from().await?.map(|(_, record)| record))
    }

    /// Like [`next`](Self::next), also naming the node that produced the record.
    pub async fn next_from(&mut self) -> Result<Option<(NodeId, Record)>, QueryError> {
        if self.done {
            return Ok(None);
        }

        loop {
            match self.receiver.drain().await {
                Drained::Item(ResultEnvelope::Record { node, record }) => {
                    return Ok(Some((node, record)));
                }
                Drained::Item(ResultEnvelope::EndOfStream { node }) => {
                    trace!(%node, "node stream finished");
                }
                Drained::Item(ResultEnvelope::Failed(error)) => {
                    // Reported in aggregate once every node has finished.
                    debug!(node = %error.node, error = %error.source, "node failure observed");
                }
                Drained::Cancelled => {
                    self.done = true;
                    return Err(QueryError::ConsumerCancelled);
                }
                Drained::Closed => {
                    self.done = true;
                    return match self.shared.outcome() {
                        Some(outcome) => outcome.into_result().map(|()| None),
                        None => Err(QueryError::Internal(
                            "record queue closed before the query finished".to_string(),
                        )),
                    };
                }
            }
        }
    }

    /// Stop the query. Workers stop, their slots are released, and the next
    /// pull raises [`QueryError::ConsumerCancelled`].
    pub fn cancel(&self) {
        if self.shared.abort.trigger(AbortReason::ConsumerCancelled) {
            debug!("query cancelled by consumer");
        }
    }

    /// A handle that can cancel the query from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            abort: self.shared.abort.clone(),
        }
    }

    /// The query's outcome, once the coordinator has decided it.
    pub fn outcome(&self) -> Option<QueryOutcome> {
        self.shared.outcome()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> QueryPhase {
        self.shared.phase()
    }

    /// Snapshot of every node task.
    pub fn tasks(&self) -> Vec<NodeTask> {
        self.shared.tasks()
    }

    /// The query's admission gate, for inspecting slot usage.
    pub fn admission_gate(&self) -> &AdmissionGate {
        &self.shared.gate
    }

    /// Wait for the coordinator to decide the outcome.
    ///
    /// Workers block on a full queue, so this only resolves while the queue
    /// has room, the query is aborted, or another task keeps draining.
    pub async fn wait_finished(&self) -> QueryOutcome {
        let mut rx = self.shared.subscribe_outcome();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            QueryOutcome::Aborted(AbortReason::Internal(
                "query coordinator went away".to_string(),
            ))
        })
    }

    /// Drain every remaining record, returning them with the query's result.
    pub async fn collect_all(&mut self) -> (Vec<Record>, Result<(), QueryError>) {
        let mut records = Vec::new();
        loop {
            match self.next().await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => return (records, Ok(())),
                Err(e) => return (records, Err(e)),
            }
        }
    }
}

impl Drop for ResultCursor {
    fn drop(&mut self) {
        if self.shared.outcome().is_none() {
            self.shared.abort.trigger(AbortReason::ConsumerCancelled);
        }
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("phase", &self.phase())
            .field("done", &self.done)
            .finish()
    }
}

/// Cloneable handle that cancels a query.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    abort: AbortSignal,
}

impl CancelHandle {
    /// Same as [`ResultCursor::cancel`].
    pub fn cancel(&self) {
        self.abort.trigger(AbortReason::ConsumerCancelled);
    }

    /// Whether the query has been cancelled by the consumer.
    pub fn is_cancelled(&self) -> bool {
        self.abort.is_consumer_cancelled()
    }
}
