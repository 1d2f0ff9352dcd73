//! Bounded result queue between node workers and the cursor.
//!
//! Built on a tokio bounded `mpsc` channel. Workers push through cloned
//! [`RecordSender`]s and block while the queue is full, which throttles how
//! fast they pull from their node sessions. The single [`RecordReceiver`]
//! is drained by the cursor.
//!
//! Each worker pushes its own records sequentially into one FIFO channel,
//! so per-node order is preserved. Records of different nodes interleave in
//! whatever order the pushes land.

use sluice_types::{NodeId, Record};
use tokio::sync::mpsc;

use crate::error::NodeError;
use crate::signal::{AbortListener, AbortSignal};

/// One item flowing from a worker to the cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEnvelope {
    /// A record produced by `node`.
    Record {
        /// Producing node.
        node: NodeId,
        /// The record, already projected.
        record: Record,
    },
    /// `node` has no more records.
    EndOfStream {
        /// The finished node.
        node: NodeId,
    },
    /// `node` failed; no more records will come from it.
    Failed(NodeError),
}

/// A push could not complete because the query was aborted or the consumer
/// went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("record queue push cancelled")]
pub struct PushCancelled;

/// Result of one drain attempt.
#[derive(Debug, PartialEq)]
pub enum Drained {
    /// The next envelope in the queue.
    Item(ResultEnvelope),
    /// Every sender is gone and the queue is empty.
    Closed,
    /// The consumer cancelled the query. Buffered items are abandoned.
    Cancelled,
}

/// Create a queue holding at most `capacity` envelopes.
pub fn record_queue(capacity: usize, abort: &AbortSignal) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let sender = RecordSender {
        tx,
        abort: abort.clone(),
        listener: abort.listener(),
    };
    let receiver = RecordReceiver {
        rx,
        listener: abort.listener(),
    };
    (sender, receiver)
}

/// Producer side of the queue.
pub struct RecordSender {
    tx: mpsc::Sender<ResultEnvelope>,
    abort: AbortSignal,
    listener: AbortListener,
}

impl RecordSender {
    /// Push an envelope, waiting while the queue is full.
    ///
    /// Fails with [`PushCancelled`] as soon as any abort is signalled, even if
    /// space is available, or when the receiver has been dropped.
    pub async fn push(&mut self, envelope: ResultEnvelope) -> Result<(), PushCancelled> {
        tokio::select! {
            biased;
            _ = self.listener.triggered() => Err(PushCancelled),
            sent = self.tx.send(envelope) => sent.map_err(|_| PushCancelled),
        }
    }
}

impl Clone for RecordSender {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            abort: self.abort.clone(),
            listener: self.abort.listener(),
        }
    }
}

/// Consumer side of the queue.
pub struct RecordReceiver {
    rx: mpsc::Receiver<ResultEnvelope>,
    listener: AbortListener,
}

impl RecordReceiver {
    /// Take the next envelope, waiting while the queue is empty and some
    /// sender is still alive.
    ///
    /// Aborts other than consumer cancellation do not interrupt draining:
    /// whatever was buffered is still handed out before [`Drained::Closed`].
    pub async fn drain(&mut self) -> Drained {
        tokio::select! {
            biased;
            _ = self.listener.consumer_cancelled() => Drained::Cancelled,
            msg = self.rx.recv() => match msg {
                Some(envelope) => Drained::Item(envelope),
                None => Drained::Closed,
            },
        }
    }
}
