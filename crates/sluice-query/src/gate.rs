//! Admission gate: bounds how many node queries run at once.
//!
//! [`AdmissionGate`] wraps a fair (FIFO) tokio [`Semaphore`]. A limit of 0
//! means unbounded, in which case no semaphore is used at all. Limits at or
//! above [`Semaphore::MAX_PERMITS`] can never be reached and are treated the
//! same way. Slots are
//! handed out as [`AdmissionPermit`]s and go back to the gate when the permit
//! is released or dropped, so every exit path of a worker frees its slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

struct GateInner {
    limit: usize,
    semaphore: Option<Arc<Semaphore>>,
    in_use: AtomicUsize,
    high_water: AtomicUsize,
}

/// Concurrency limiter for node queries.
#[derive(Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

impl AdmissionGate {
    /// Create a gate with `limit` slots. `0` admits everything immediately.
    pub fn new(limit: usize) -> Self {
        let bounded = limit > 0 && limit < Semaphore::MAX_PERMITS;
        let semaphore = bounded.then(|| Arc::new(Semaphore::new(limit)));
        Self {
            inner: Arc::new(GateInner {
                limit,
                semaphore,
                in_use: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot. Waiters are served in arrival order.
    ///
    /// Cancel safe: dropping the future before it resolves takes no slot.
    pub async fn acquire(&self) -> AdmissionPermit {
        let permit = match &self.inner.semaphore {
            // The gate never closes its semaphore, so acquisition cannot fail.
            Some(sem) => sem.clone().acquire_owned().await.ok(),
            None => None,
        };
        self.admit(permit)
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        let permit = match &self.inner.semaphore {
            Some(sem) => Some(sem.clone().try_acquire_owned().ok()?),
            None => None,
        };
        Some(self.admit(permit))
    }

    /// Configured limit; `0` means unbounded.
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Free slots, or `usize::MAX` for an unbounded gate.
    pub fn available(&self) -> usize {
        match &self.inner.semaphore {
            Some(sem) => sem.available_permits(),
            None => usize::MAX,
        }
    }

    /// Highest number of permits ever held at the same time.
    pub fn high_water(&self) -> usize {
        self.inner.high_water.load(Ordering::Acquire)
    }

    fn admit(&self, permit: Option<OwnedSemaphorePermit>) -> AdmissionPermit {
        let now = self.inner.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.high_water.fetch_max(now, Ordering::AcqRel);
        trace!(in_use = now, limit = self.inner.limit, "admission slot granted");
        AdmissionPermit {
            _permit: permit,
            inner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("limit", &self.limit())
            .field("in_use", &self.in_use())
            .field("high_water", &self.high_water())
            .finish()
    }
}

/// One admitted slot. Released exactly once, on [`release`](Self::release)
/// or drop.
pub struct AdmissionPermit {
    // Dropped after `Drop::drop` runs, so `in_use` is decremented before the
    // slot becomes visible to the next waiter.
    _permit: Option<OwnedSemaphorePermit>,
    inner: Arc<GateInner>,
}

impl AdmissionPermit {
    /// Give the slot back to the gate.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let now = self.inner.in_use.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(in_use = now, "admission slot released");
    }
}
