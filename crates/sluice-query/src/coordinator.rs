//! Scatter-gather coordinator.
//!
//! One coordinator task runs per query. It admits target nodes through the
//! [`AdmissionGate`], spawns a [`NodeWorker`] per admitted node, reaps
//! finished workers, watches the cluster generation and the abort signal,
//! and finally decides the [`QueryOutcome`].
//!
//! Scattering and gathering are interleaved in a single `select!` loop, so
//! admission never waits on queue backpressure and a finished worker frees
//! its slot for the next pending node straight away.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use sluice_cluster::TopologyWatch;
use sluice_types::{ClusterGeneration, NodeId, QueryPolicy};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::NodeError;
use crate::gate::AdmissionGate;
use crate::queue::RecordSender;
use crate::session::{NodeSession, SessionRequest};
use crate::signal::{AbortReason, AbortSignal};
use crate::task::{NodeTask, NodeTaskStatus, QueryOutcome, QueryPhase, TaskTable};
use crate::worker::NodeWorker;

/// State shared between the coordinator and the cursor.
pub(crate) struct QueryShared {
    pub(crate) tasks: TaskTable,
    pub(crate) gate: AdmissionGate,
    pub(crate) abort: AbortSignal,
    phase: Mutex<QueryPhase>,
    outcome_tx: watch::Sender<Option<QueryOutcome>>,
}

impl QueryShared {
    pub(crate) fn new(tasks: TaskTable, gate: AdmissionGate, abort: AbortSignal) -> Arc<Self> {
        let (outcome_tx, _) = watch::channel(None);
        Arc::new(Self {
            tasks,
            gate,
            abort,
            phase: Mutex::new(QueryPhase::Initializing),
            outcome_tx,
        })
    }

    pub(crate) fn phase(&self) -> QueryPhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    fn set_phase(&self, next: QueryPhase) {
        let mut phase = self.phase.lock().expect("phase lock poisoned");
        if phase.advance(next) {
            debug!(phase = ?next, "query phase changed");
        }
    }

    pub(crate) fn outcome(&self) -> Option<QueryOutcome> {
        self.outcome_tx.borrow().clone()
    }

    pub(crate) fn subscribe_outcome(&self) -> watch::Receiver<Option<QueryOutcome>> {
        self.outcome_tx.subscribe()
    }

    pub(crate) fn tasks(&self) -> Vec<NodeTask> {
        self.tasks.snapshot()
    }

    /// Record the outcome and enter the matching terminal phase. Only the
    /// first call has any effect.
    fn finish(&self, outcome: QueryOutcome) {
        self.set_phase(outcome.phase());
        self.outcome_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }
}

/// Everything the coordinator task needs, moved into it at spawn time.
pub(crate) struct Coordinator {
    pub(crate) policy: QueryPolicy,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) started: ClusterGeneration,
    pub(crate) request: Arc<SessionRequest>,
    pub(crate) topology: Arc<dyn TopologyWatch>,
    pub(crate) session: Arc<dyn NodeSession>,
    pub(crate) shared: Arc<QueryShared>,
    pub(crate) sender: RecordSender,
}

impl Coordinator {
    /// Drive the query to a terminal outcome.
    pub(crate) async fn run(self) {
        let shared = self.shared.clone();
        let mut pending: VecDeque<NodeId> = self.nodes.iter().copied().collect();
        let mut workers: JoinSet<NodeTaskStatus> = JoinSet::new();
        let mut worker_nodes: HashMap<tokio::task::Id, NodeId> = HashMap::new();
        let mut failures: Vec<NodeError> = Vec::new();
        let mut abort = shared.abort.listener();
        let mut generation_rx = self.topology.subscribe();
        generation_rx.borrow_and_update();
        let mut watching = self.policy.fail_on_cluster_change;
        let deadline = self.policy.total_timeout().map(|t| (Instant::now() + t, t));

        shared.set_phase(QueryPhase::Scattering);

        // The topology may have moved between the snapshot and this task
        // starting.
        if watching {
            let observed = self.topology.current_generation().await;
            self.check_generation(observed);
        }

        loop {
            let aborting = shared.abort.is_triggered();
            if aborting && !pending.is_empty() {
                pending.clear();
                let cancelled = shared.tasks.cancel_pending();
                debug!(cancelled, "abort: pending nodes will not be admitted");
                shared.set_phase(QueryPhase::Gathering);
            }
            if pending.is_empty() && workers.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                reason = abort.triggered(), if !aborting => {
                    info!(?reason, "query aborting");
                }

                _ = deadline_elapsed(deadline), if !aborting => {
                    if let Some((_, after)) = deadline {
                        warn!(timeout_ms = after.as_millis() as u64, "query total timeout elapsed");
                        shared.abort.trigger(AbortReason::TimedOut(after));
                    }
                }

                changed = generation_rx.changed(), if watching && !aborting => {
                    match changed {
                        Ok(()) => {
                            let observed = *generation_rx.borrow_and_update();
                            self.check_generation(observed);
                        }
                        Err(_) => {
                            // Topology source is gone; fall back to checks at
                            // admission and completion.
                            watching = false;
                        }
                    }
                }

                joined = workers.join_next_with_id(), if !workers.is_empty() => {
                    match joined {
                        Some(Ok((id, status))) => {
                            let node = worker_nodes.remove(&id);
                            if let NodeTaskStatus::Failed(error) = status {
                                failures.push(error);
                            }
                            debug!(?node, running = workers.len(), "node worker finished");
                        }
                        Some(Err(e)) => {
                            let node = worker_nodes.remove(&e.id());
                            if let Some(node) = node {
                                shared.tasks.set_status(node, NodeTaskStatus::Cancelled);
                            }
                            error!(?node, error = %e, "node worker died");
                            shared.abort.trigger(AbortReason::Internal(format!(
                                "node worker terminated abnormally: {e}"
                            )));
                        }
                        None => {}
                    }
                    if self.policy.fail_on_cluster_change && !shared.abort.is_triggered() {
                        let observed = self.topology.current_generation().await;
                        self.check_generation(observed);
                    }
                }

                permit = shared.gate.acquire(), if !pending.is_empty() && !aborting => {
                    if self.policy.fail_on_cluster_change {
                        let observed = self.topology.current_generation().await;
                        if !self.check_generation(observed) {
                            drop(permit);
                            continue;
                        }
                    }
                    let Some(node) = pending.pop_front() else {
                        continue;
                    };
                    let worker = NodeWorker::new(
                        node,
                        self.session.clone(),
                        self.request.clone(),
                        self.sender.clone(),
                        shared.abort.listener(),
                        shared.tasks.clone(),
                    );
                    let handle = workers.spawn(worker.run(permit));
                    worker_nodes.insert(handle.id(), node);
                    debug!(%node, in_use = shared.gate.in_use(), remaining = pending.len(), "node admitted");
                    if pending.is_empty() {
                        shared.set_phase(QueryPhase::Gathering);
                    }
                }
            }
        }

        let outcome = match shared.abort.reason() {
            Some(reason) => QueryOutcome::Aborted(reason),
            None if failures.is_empty() => QueryOutcome::Completed,
            None => QueryOutcome::PartialFailure(failures),
        };
        match &outcome {
            QueryOutcome::Completed => info!(nodes = self.nodes.len(), "query completed"),
            QueryOutcome::PartialFailure(errors) => {
                warn!(failed = errors.len(), nodes = self.nodes.len(), "query finished with node failures")
            }
            QueryOutcome::Aborted(reason) => warn!(?reason, "query aborted"),
        }

        // Publish before the last sender drops: the cursor reads the outcome
        // as soon as it sees the queue close.
        shared.finish(outcome);
        drop(self.sender);
    }

    /// Compare `observed` with the start generation; abort on mismatch when
    /// the policy asks for it. Returns `false` if the query must stop.
    fn check_generation(&self, observed: ClusterGeneration) -> bool {
        if !self.policy.fail_on_cluster_change || observed == self.started {
            return true;
        }
        if self.shared.abort.trigger(AbortReason::ClusterChanged {
            started: self.started,
            observed,
        }) {
            warn!(started = %self.started, %observed, "cluster changed during query");
        }
        false
    }
}

async fn deadline_elapsed(deadline: Option<(Instant, std::time::Duration)>) {
    match deadline {
        Some((at, _)) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
