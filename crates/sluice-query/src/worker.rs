//! Per-node worker: drives one node session into the result queue.

use std::sync::Arc;

use sluice_types::NodeId;
use tracing::{Instrument, debug, info_span, warn};

use crate::error::{NodeError, SessionError};
use crate::gate::AdmissionPermit;
use crate::queue::{RecordSender, ResultEnvelope};
use crate::session::{NodeSession, SessionRequest};
use crate::signal::AbortListener;
use crate::task::{NodeTaskStatus, TaskTable};

/// Streams one node's records into the queue. Never retries.
pub(crate) struct NodeWorker {
    node: NodeId,
    session: Arc<dyn NodeSession>,
    request: Arc<SessionRequest>,
    sender: RecordSender,
    abort: AbortListener,
    tasks: TaskTable,
}

impl NodeWorker {
    pub(crate) fn new(
        node: NodeId,
        session: Arc<dyn NodeSession>,
        request: Arc<SessionRequest>,
        sender: RecordSender,
        abort: AbortListener,
        tasks: TaskTable,
    ) -> Self {
        Self {
            node,
            session,
            request,
            sender,
            abort,
            tasks,
        }
    }

    /// Run to a terminal status, then give the admission slot back.
    pub(crate) async fn run(mut self, permit: AdmissionPermit) -> NodeTaskStatus {
        let node = self.node;
        let span = info_span!("node_query", node = %node);

        async move {
            self.tasks.set_status(node, NodeTaskStatus::Running);
            let status = self.drive().await;
            // Mark terminal before the slot frees so the table never shows
            // more running tasks than the gate allows.
            self.tasks.set_status(node, status.clone());
            permit.release();
            status
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> NodeTaskStatus {
        let opened = tokio::select! {
            biased;
            _ = self.abort.triggered() => {
                debug!("aborted before session opened");
                return NodeTaskStatus::Cancelled;
            }
            opened = self.session.open(self.node, &self.request) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.fail(e, 0).await,
        };

        let mut records = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.abort.triggered() => {
                    debug!(records, "node query cancelled");
                    return NodeTaskStatus::Cancelled;
                }
                next = stream.next_record() => next,
            };

            match next {
                Ok(Some(mut record)) => {
                    // Enforce the projection even if the session ignored it.
                    self.request.projection.apply(&mut record);
                    let envelope = ResultEnvelope::Record {
                        node: self.node,
                        record,
                    };
                    if self.sender.push(envelope).await.is_err() {
                        debug!(records, "node query cancelled while queue was full");
                        return NodeTaskStatus::Cancelled;
                    }
                    records += 1;
                    self.tasks.record_pushed(self.node);
                }
                Ok(None) => {
                    let envelope = ResultEnvelope::EndOfStream { node: self.node };
                    if self.sender.push(envelope).await.is_err() {
                        return NodeTaskStatus::Cancelled;
                    }
                    debug!(records, "node query complete");
                    return NodeTaskStatus::Succeeded;
                }
                Err(e) => return self.fail(e, records).await,
            }
        }
    }

    async fn fail(&mut self, source: SessionError, records: u64) -> NodeTaskStatus {
        warn!(error = %source, records, "node query failed");
        let error = NodeError {
            node: self.node,
            source,
        };
        if self
            .sender
            .push(ResultEnvelope::Failed(error.clone()))
            .await
            .is_err()
        {
            return NodeTaskStatus::Cancelled;
        }
        NodeTaskStatus::Failed(error)
    }
}
