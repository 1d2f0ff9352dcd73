//! Query-wide abort signal.
//!
//! One [`AbortSignal`] exists per query. The coordinator, every node worker,
//! the record queue and the cursor each hold a clone or an [`AbortListener`]
//! so that a single `trigger` unblocks every suspension point of the query.

use std::sync::Arc;
use std::time::Duration;

use sluice_types::ClusterGeneration;
use tokio::sync::watch;

/// Why a query was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The cluster generation moved while `fail_on_cluster_change` was set.
    ClusterChanged {
        /// Generation snapshotted when the query started.
        started: ClusterGeneration,
        /// Generation that was observed instead.
        observed: ClusterGeneration,
    },
    /// The consumer stopped the query.
    ConsumerCancelled,
    /// The total timeout elapsed.
    TimedOut(Duration),
    /// The coordinator hit an unrecoverable error.
    Internal(String),
}

#[derive(Debug, Default)]
struct AbortState {
    /// First reason wins and never changes afterwards.
    reason: Option<AbortReason>,
    /// Set whenever the consumer cancels, even after another abort.
    consumer_cancelled: bool,
}

/// Sticky, broadcast abort flag for one query.
#[derive(Clone)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<AbortState>>,
}

impl AbortSignal {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AbortState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Abort the query. Returns `true` if this call set the reason.
    pub fn trigger(&self, reason: AbortReason) -> bool {
        let mut first = false;
        self.tx.send_if_modified(|state| {
            let mut modified = false;
            if reason == AbortReason::ConsumerCancelled && !state.consumer_cancelled {
                state.consumer_cancelled = true;
                modified = true;
            }
            if state.reason.is_none() {
                state.reason = Some(reason);
                first = true;
                modified = true;
            }
            modified
        });
        first
    }

    /// The reason the query was aborted, if it was.
    pub fn reason(&self) -> Option<AbortReason> {
        self.tx.borrow().reason.clone()
    }

    /// Whether any abort has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().reason.is_some()
    }

    /// Whether the consumer has cancelled.
    pub fn is_consumer_cancelled(&self) -> bool {
        self.tx.borrow().consumer_cancelled
    }

    /// Create a listener that can await the signal.
    pub fn listener(&self) -> AbortListener {
        AbortListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("reason", &self.reason())
            .finish()
    }
}

/// Awaitable side of an [`AbortSignal`]. Both wait methods are cancel safe.
pub struct AbortListener {
    rx: watch::Receiver<AbortState>,
}

impl AbortListener {
    /// Resolve once the query is aborted, with the reason.
    pub async fn triggered(&mut self) -> AbortReason {
        loop {
            if let Some(reason) = self.rx.borrow_and_update().reason.clone() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                // Every signal handle is gone, so nobody can abort any more.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Resolve once the consumer cancels.
    pub async fn consumer_cancelled(&mut self) {
        loop {
            if self.rx.borrow_and_update().consumer_cancelled {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Non-blocking check of the consumer-cancelled flag.
    pub fn is_consumer_cancelled(&self) -> bool {
        self.rx.borrow().consumer_cancelled
    }
}
