//! Reporters for slot events
//!
//! Workers hand every insert/remove to an [`EventSink`]. The core never reads
//! the events back; rendering, counting and recording all live here.

use crate::core::{Role, SlotEvent};
use crate::system::metrics::FactoryMetrics;
use std::sync::Arc;

/// Receiver of per-mutation observability events.
///
/// Called from worker threads right after the buffer mutation, outside the
/// buffer's exclusive section. Implementations should be quick.
pub trait EventSink: Send + Sync {
    /// Handle one event
    fn record(&self, event: &SlotEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl EventSink for TracingReporter {
    fn record(&self, event: &SlotEvent) {
        match event.role() {
            Role::Producer => tracing::info!(
                role = "producer",
                worker = event.worker.index,
                slot = event.slot,
                occupancy = event.occupancy,
                sequence = event.sequence,
                "Producer {} produced in slot {}! {} widgets now available!",
                event.worker.index,
                event.slot,
                event.occupancy
            ),
            Role::Consumer => tracing::info!(
                role = "consumer",
                worker = event.worker.index,
                slot = event.slot,
                occupancy = event.occupancy,
                sequence = event.sequence,
                "Consumer {} consumed in slot {}! {} widgets left!",
                event.worker.index,
                event.slot,
                event.occupancy
            ),
        }
    }
}

/// Feeds events into the global Prometheus metrics
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsReporter;

impl EventSink for MetricsReporter {
    fn record(&self, event: &SlotEvent) {
        let Some(metrics) = FactoryMetrics::global() else {
            return;
        };
        match event.role() {
            Role::Producer => metrics.widgets_produced.inc(),
            Role::Consumer => metrics.widgets_consumed.inc(),
        }
        metrics.buffer_occupancy.set(event.occupancy as i64);
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: &SlotEvent) {}
}

/// Forwards every event to each inner sink in order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of inner sinks
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no inner sinks
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn record(&self, event: &SlotEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
