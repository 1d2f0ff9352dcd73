//! Scatter-gather query engine.
//!
//! A query fans out to every node that serves its namespace and funnels the
//! records back through one bounded queue to a single consumer:
//!
//! - [`AdmissionGate`]: bounds how many node queries run at once
//!   (`max_concurrent_nodes`, `0` = all).
//! - node workers: one per admitted node; stream records from a
//!   [`NodeSession`] into the queue, never retrying.
//! - the record queue: bounded by `record_queue_size`; a full queue blocks
//!   workers, which throttles the nodes.
//! - the coordinator: admits nodes, reaps workers, watches the cluster
//!   generation, the timeout and the abort signal, and decides the
//!   [`QueryOutcome`].
//! - [`ResultCursor`]: the caller's pull interface.
//!
//! Start a query with [`QueryExecutor::execute`].

mod coordinator;
mod cursor;
mod error;
mod executor;
mod gate;
mod memory_session;
mod queue;
mod session;
mod signal;
mod slow_session;
mod task;
mod worker;

#[cfg(test)]
mod tests;

pub use cursor::{CancelHandle, ResultCursor};
pub use error::{NodeError, QueryError, SessionError};
pub use executor::QueryExecutor;
pub use gate::{AdmissionGate, AdmissionPermit};
pub use memory_session::MemorySession;
pub use queue::{Drained, PushCancelled, RecordReceiver, RecordSender, ResultEnvelope, record_queue};
pub use session::{NodeSession, RecordStream, SessionRequest};
pub use signal::{AbortListener, AbortReason, AbortSignal};
pub use slow_session::SlowSession;
pub use task::{NodeTask, NodeTaskStatus, QueryOutcome, QueryPhase, TaskTable};
