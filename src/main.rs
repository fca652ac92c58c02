//! Widget Factory
//!
//! Runs the producer/consumer simulation from the command line. Ctrl+C or
//! SIGTERM asks the running simulation to stop cooperatively.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use widget_factory::core::config::parse_duration;
use widget_factory::system::{EventSink, FanoutSink, MetricsReporter, NullSink, TracingReporter};
use widget_factory::{Config, Error, Result, RunSummary, SimulationSupervisor, StopHandle, StopReason};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("widget-factory")
        .version(widget_factory::VERSION)
        .about("Bounded-buffer producer/consumer simulation.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("DURATION")
                .help("Run length, e.g. 30s or 500ms (0 = until Ctrl+C)")
        )
        .arg(
            Arg::new("producers")
                .short('p')
                .long("producers")
                .value_name("N")
                .help("Number of producer threads")
        )
        .arg(
            Arg::new("consumers")
                .short('n')
                .long("consumers")
                .value_name("N")
                .help("Number of consumer threads")
        )
        .arg(
            Arg::new("capacity")
                .short('b')
                .long("capacity")
                .value_name("SLOTS")
                .help("Buffer capacity")
        )
        .arg(
            Arg::new("grace-period")
                .long("grace-period")
                .value_name("DURATION")
                .help("How long workers get to stop")
        )
        .arg(
            Arg::new("runs")
                .long("runs")
                .value_name("N")
                .default_value("1")
                .help("Number of consecutive runs")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print each run summary as JSON")
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print Prometheus metrics after the last run")
        )
        .get_matches();

    // Load configuration
    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        let mut config = Config::from_file(PathBuf::from(config_path))?;
        config.apply_env_overrides()?;
        config
    } else {
        Config::load()?
    };

    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    widget_factory::init_logging(&config.logging)?;
    info!("Starting {} v{}", widget_factory::NAME, widget_factory::VERSION);

    let runs: u32 = matches
        .get_one::<String>("runs")
        .map(|r| r.parse())
        .transpose()
        .map_err(|e| Error::config(format!("Invalid run count: {}", e)))?
        .unwrap_or(1);

    let mut supervisor = SimulationSupervisor::new(config.simulation.clone())?
        .with_sink(build_sink(&config));
    let stop = supervisor.stop_handle();
    let json = matches.get_flag("json");

    let simulation = {
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<RunSummary>> {
            let mut summaries = Vec::new();
            for run in 1..=runs {
                if stop.is_halted() {
                    break;
                }
                info!(run, of = runs, "starting run");
                let summary = supervisor.run()?;
                report(&summary, json)?;
                let requested = summary.stop_reason == StopReason::Requested;
                summaries.push(summary);
                if requested {
                    break;
                }
            }
            Ok(summaries)
        })
    };

    tokio::pin!(simulation);
    let summaries = tokio::select! {
        joined = &mut simulation => joined,
        _ = shutdown_signal() => {
            halt(&stop);
            simulation.await
        }
    }
    .map_err(|e| Error::internal(format!("Simulation task failed: {}", e)))??;

    if matches.get_flag("metrics") {
        print!("{}", widget_factory::system::metrics::collect_metrics());
    }

    let warnings: usize = summaries.iter().map(|s| s.warnings.len()).sum();
    if warnings > 0 {
        warn!(warnings, "finished with warnings");
    }
    info!(runs = summaries.len(), "Shutdown complete");
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &clap::ArgMatches) -> Result<()> {
    let sim = &mut config.simulation;

    if let Some(duration) = matches.get_one::<String>("duration") {
        sim.duration = parse_duration(duration)
            .map_err(|e| Error::config(format!("Invalid duration: {}", e)))?;
    }

    if let Some(producers) = matches.get_one::<String>("producers") {
        sim.producers = producers.parse()
            .map_err(|e| Error::config(format!("Invalid producer count: {}", e)))?;
    }

    if let Some(consumers) = matches.get_one::<String>("consumers") {
        sim.consumers = consumers.parse()
            .map_err(|e| Error::config(format!("Invalid consumer count: {}", e)))?;
    }

    if let Some(capacity) = matches.get_one::<String>("capacity") {
        sim.capacity = capacity.parse()
            .map_err(|e| Error::config(format!("Invalid capacity: {}", e)))?;
    }

    if let Some(grace) = matches.get_one::<String>("grace-period") {
        sim.grace_period = parse_duration(grace)
            .map_err(|e| Error::config(format!("Invalid grace period: {}", e)))?;
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    Ok(())
}

/// Slot events go to the log and/or the metrics registry
fn build_sink(config: &Config) -> Arc<dyn EventSink> {
    let mut sink = FanoutSink::new();
    if config.logging.slot_events {
        sink = sink.with(Arc::new(TracingReporter));
    }
    if config.metrics.enable_prometheus {
        sink = sink.with(Arc::new(MetricsReporter));
    }
    if sink.is_empty() {
        Arc::new(NullSink)
    } else {
        Arc::new(sink)
    }
}

fn report(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!(
            "produced {} / consumed {} / {} of {} slots filled (peak {}) after {:?}, stopped: {:?}",
            summary.produced,
            summary.consumed,
            summary.final_occupancy,
            summary.capacity,
            summary.peak_occupancy,
            summary.elapsed,
            summary.stop_reason,
        );
        for warning in &summary.warnings {
            println!("warning: {:?}", warning);
        }
    }
    Ok(())
}

/// Stops the running simulation and any run that has not started yet
fn halt(stop: &StopHandle) {
    if stop.halt() {
        warn!("Received shutdown signal, stopping workers...");
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
