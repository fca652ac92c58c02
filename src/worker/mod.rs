//! Producer and consumer workers
//!
//! Each worker runs on its own OS thread with everything it needs passed in a
//! [`WorkerContext`]; there is no ambient global state. A worker suspends in
//! exactly two places, the simulated work delay and the reservation wait, and
//! checks the run signal around both.

pub mod consumer;
pub mod producer;
pub mod signal;

pub use consumer::Consumer;
pub use producer::Producer;
pub use signal::{Phase, RunSignal, StopReason};

use crate::buffer::BoundedBuffer;
use crate::core::{BufferError, Error, Widget, WorkerId};
use crate::system::EventSink;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Inclusive range of simulated work per widget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    /// Range `[min, max]`; an inverted range collapses to `min`
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }

    /// No delay at all
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draw one delay
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let span = (self.max - self.min).as_nanos().min(u64::MAX as u128) as u64;
        if span == 0 {
            return self.min;
        }
        self.min.saturating_add(Duration::from_nanos(rng.random_range(0..=span)))
    }
}

/// Source of widget serials, unique within one run
#[derive(Debug, Default)]
pub struct SerialSource(AtomicU64);

impl SerialSource {
    /// Start at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused serial
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Serials handed out so far
    pub fn issued(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything a worker thread owns or shares
#[derive(Clone)]
pub struct WorkerContext {
    /// Role and index of this worker
    pub id: WorkerId,
    /// Buffer of the current run
    pub buffer: Arc<BoundedBuffer<Widget>>,
    /// Start gate and stop signal of the current run
    pub signal: Arc<RunSignal>,
    /// Where slot events go
    pub sink: Arc<dyn EventSink>,
    /// Simulated work per widget
    pub pacing: Pacing,
    /// Widget serials for producers
    pub serials: Arc<SerialSource>,
}

/// What a worker did before it exited
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Which worker
    pub worker: WorkerId,
    /// Widgets inserted or removed by this worker
    pub items: u64,
}

impl WorkerReport {
    /// Empty report
    pub fn new(worker: WorkerId) -> Self {
        Self { worker, items: 0 }
    }
}

impl WorkerContext {
    /// Turn a buffer failure into a run-wide halt.
    ///
    /// Only invariant violations get here; the buffer has already closed itself.
    fn halt(&self, err: BufferError) -> Error {
        if self.signal.stop(StopReason::Fatal) {
            tracing::error!(worker = %self.id, error = %err, "halting simulation");
        }
        Error::from(err)
    }
}
