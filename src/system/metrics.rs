//! Metrics collection and monitoring for the widget factory
//!
//! Prometheus counters for widget flow and run outcomes, registered once in a
//! crate-owned registry on first use.

use crate::core::Result;
use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Instant;

/// Crate metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Centralized metrics for widget flow and run lifecycle
pub struct FactoryMetrics {
    /// Widgets inserted into the buffer
    pub widgets_produced: IntCounter,
    /// Widgets removed from the buffer
    pub widgets_consumed: IntCounter,
    /// Occupancy reported by the latest slot event or sample
    pub buffer_occupancy: IntGauge,
    /// Simulation runs completed
    pub runs: IntCounter,
    /// Workers that missed their shutdown grace period
    pub shutdown_timeouts: IntCounter,
    /// Wall-clock duration of runs in seconds
    pub run_duration: Histogram,
}

impl FactoryMetrics {
    /// Create and register all metrics
    fn new(registry: &Registry) -> Result<Self> {
        let metrics = Self {
            widgets_produced: IntCounter::new(
                "wf_widgets_produced_total",
                "Total number of widgets inserted into the buffer",
            )?,
            widgets_consumed: IntCounter::new(
                "wf_widgets_consumed_total",
                "Total number of widgets removed from the buffer",
            )?,
            buffer_occupancy: IntGauge::new(
                "wf_buffer_occupancy",
                "Filled slots in the bounded buffer",
            )?,
            runs: IntCounter::new("wf_runs_total", "Total number of simulation runs")?,
            shutdown_timeouts: IntCounter::new(
                "wf_shutdown_timeouts_total",
                "Workers that did not stop within the grace period",
            )?,
            run_duration: Histogram::with_opts(
                HistogramOpts::new("wf_run_duration_seconds", "Duration of simulation runs in seconds")
                    .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
            )?,
        };

        registry.register(Box::new(metrics.widgets_produced.clone()))?;
        registry.register(Box::new(metrics.widgets_consumed.clone()))?;
        registry.register(Box::new(metrics.buffer_occupancy.clone()))?;
        registry.register(Box::new(metrics.runs.clone()))?;
        registry.register(Box::new(metrics.shutdown_timeouts.clone()))?;
        registry.register(Box::new(metrics.run_duration.clone()))?;

        Ok(metrics)
    }

    /// Get the global metrics instance, if registration succeeded
    pub fn global() -> Option<&'static FactoryMetrics> {
        static INSTANCE: Lazy<Option<FactoryMetrics>> = Lazy::new(|| {
            FactoryMetrics::new(&REGISTRY)
                .map_err(|e| tracing::warn!("metrics disabled: {}", e))
                .ok()
        });
        INSTANCE.as_ref()
    }
}

/// Timer for measuring a run with automatic histogram recording
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    /// Start a new timer
    pub fn start(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    /// Record the elapsed time and consume the timer
    pub fn finish(self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Register the metrics eagerly so the first scrape sees them at zero
pub fn init_registry() {
    let _ = FactoryMetrics::global();
}

/// Registry holding the factory metrics
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Collect all metrics in the Prometheus text exposition format
pub fn collect_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
