//! System utilities and monitoring
//!
//! Metrics and the reporters that turn slot events into logs and counters.

pub mod metrics;
pub mod reporter;

pub use reporter::{EventSink, FanoutSink, MetricsReporter, NullSink, TracingReporter};
