//! A [`NodeSession`] wrapper that adds configurable random latency.
//!
//! `SlowSession` wraps any `Arc<dyn NodeSession>` and sleeps for a random
//! duration before opening a session and before each record. The RNG is
//! seeded for reproducible runs.
//!
//! # Example
//!
//! ```ignore
//! let slow = SlowSession::new(inner)
//!     .open_latency(5, 20)    // 5–20 ms per open
//!     .record_latency(0, 2)   // 0–2 ms per record
//!     .seed(42);
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sluice_types::{NodeId, Record};

use crate::error::SessionError;
use crate::session::{NodeSession, RecordStream, SessionRequest};

/// A [`NodeSession`] wrapper that injects random latency.
///
/// Useful for chaos testing: with real delays, nodes finish in varying order
/// and the queue, gate and abort paths see realistic interleavings.
pub struct SlowSession {
    inner: Arc<dyn NodeSession>,
    latency: Arc<Latency>,
}

struct Latency {
    open_ms: (u64, u64),
    record_ms: (u64, u64),
    seed: u64,
    rng: Mutex<StdRng>,
}

impl Latency {
    /// Sleep for a random duration in `[min, max]` milliseconds.
    async fn delay(&self, range: (u64, u64)) {
        let (min, max) = range;
        if max == 0 {
            return;
        }
        let ms = if min >= max {
            max
        } else {
            self.rng
                .lock()
                .expect("lock poisoned")
                .random_range(min..=max)
        };
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

impl SlowSession {
    /// Wrap an existing session with zero latency (pass-through) by default.
    pub fn new(inner: Arc<dyn NodeSession>) -> Self {
        Self {
            inner,
            latency: Arc::new(Latency {
                open_ms: (0, 0),
                record_ms: (0, 0),
                seed: 0,
                rng: Mutex::new(StdRng::seed_from_u64(0)),
            }),
        }
    }

    /// Set the latency range for opening a session, in milliseconds.
    pub fn open_latency(self, min_ms: u64, max_ms: u64) -> Self {
        self.configure(|l| l.open_ms = (min_ms, max_ms))
    }

    /// Set the latency range before each record, in milliseconds.
    pub fn record_latency(self, min_ms: u64, max_ms: u64) -> Self {
        self.configure(|l| l.record_ms = (min_ms, max_ms))
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        self.configure(|l| {
            l.seed = seed;
            l.rng = Mutex::new(StdRng::seed_from_u64(seed));
        })
    }

    fn configure(self, f: impl FnOnce(&mut Latency)) -> Self {
        let mut latency = match Arc::try_unwrap(self.latency) {
            Ok(latency) => latency,
            // Open streams still hold the settings: copy them and restart
            // the RNG from the configured seed.
            Err(shared) => Latency {
                open_ms: shared.open_ms,
                record_ms: shared.record_ms,
                seed: shared.seed,
                rng: Mutex::new(StdRng::seed_from_u64(shared.seed)),
            },
        };
        f(&mut latency);
        Self {
            inner: self.inner,
            latency: Arc::new(latency),
        }
    }
}

#[async_trait::async_trait]
impl NodeSession for SlowSession {
    async fn open(
        &self,
        node: NodeId,
        request: &SessionRequest,
    ) -> Result<Box<dyn RecordStream>, SessionError> {
        self.latency.delay(self.latency.open_ms).await;
        let inner = self.inner.open(node, request).await?;
        Ok(Box::new(SlowStream {
            inner,
            latency: self.latency.clone(),
        }))
    }
}

struct SlowStream {
    inner: Box<dyn RecordStream>,
    latency: Arc<Latency>,
}

#[async_trait::async_trait]
impl RecordStream for SlowStream {
    async fn next_record(&mut self) -> Result<Option<Record>, SessionError> {
        self.latency.delay(self.latency.record_ms).await;
        self.inner.next_record().await
    }
}
