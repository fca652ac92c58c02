//! Widget Factory - bounded-buffer producer/consumer simulation
//!
//! A pool of producer threads and a pool of consumer threads share one
//! fixed-capacity circular buffer. Producers block while the buffer is full,
//! consumers block while it is empty, and no widget is ever lost, duplicated
//! or overwritten.
//!
//! ```no_run
//! use widget_factory::{SimulationSupervisor, core::config::SimulationConfig};
//!
//! let mut supervisor = SimulationSupervisor::new(SimulationConfig::default())?;
//! let stop = supervisor.stop_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(3));
//!     stop.request_stop();
//! });
//! let summary = supervisor.run()?;
//! assert_eq!(summary.produced - summary.consumed, summary.final_occupancy as u64);
//! # Ok::<(), widget_factory::Error>(())
//! ```
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Main functional modules
pub mod buffer;
pub mod worker;
pub mod supervisor;
pub mod system;

// Re-export commonly used items for convenience
pub use crate::core::{BufferError, Config, Error, Result, Widget};
pub use buffer::BoundedBuffer;
pub use supervisor::{RunSummary, RunWarning, SimulationSupervisor, StopHandle, SupervisorState};
pub use system::EventSink;
pub use worker::StopReason;

use crate::core::config::{LoggingConfig, SimulationConfig};
use std::time::Duration;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this again once a
/// subscriber is installed leaves the first one in place.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::config(format!("Invalid log filter: {}", e)))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.format.as_str() {
        "compact" => builder.compact().try_init(),
        "full" => builder.try_init(),
        _ => builder.pretty().try_init(),
    };
    if installed.is_ok() {
        tracing::info!("Initializing {} v{}", NAME, VERSION);
        system::metrics::init_registry();
    }
    Ok(())
}

/// Run one simulation with default pacing and grace period.
///
/// The run always has a time limit: a `duration_seconds` of zero is rejected,
/// since nothing could stop the run. For open-ended runs build a
/// [`SimulationSupervisor`] and keep its [`StopHandle`].
pub fn start_simulation(
    duration_seconds: u64,
    producer_count: usize,
    consumer_count: usize,
    buffer_capacity: usize,
) -> Result<RunSummary> {
    if duration_seconds == 0 {
        return Err(Error::invalid_input(
            "start_simulation needs a positive duration; use SimulationSupervisor to run until stopped",
        ));
    }
    let settings = SimulationConfig {
        duration: Duration::from_secs(duration_seconds),
        producers: producer_count,
        consumers: consumer_count,
        capacity: buffer_capacity,
        ..SimulationConfig::default()
    };
    SimulationSupervisor::new(settings)?.run()
}
