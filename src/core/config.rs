//! Configuration management for the widget factory
//!
//! Defaults reproduce the classic exercise: 5 producers, 5 consumers, 200
//! slots, 30 seconds of simulation and up to 4 seconds of work per widget.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default config file looked up by [`Config::load`]
pub const DEFAULT_CONFIG_FILE: &str = "widget-factory.toml";

/// Upper bound on workers per role
pub const MAX_WORKERS_PER_ROLE: usize = 1024;

/// Upper bound for every configured duration
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Simulation run parameters
    pub simulation: SimulationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Parameters of one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// How long to run; zero runs until a stop is requested
    #[serde(with = "duration_str")]
    pub duration: Duration,

    /// Number of producer workers
    pub producers: usize,

    /// Number of consumer workers
    pub consumers: usize,

    /// Number of slots in the bounded buffer
    pub capacity: usize,

    /// Lower bound of the simulated work per widget
    #[serde(with = "duration_str")]
    pub min_delay: Duration,

    /// Upper bound (inclusive) of the simulated work per widget
    #[serde(with = "duration_str")]
    pub max_delay: Duration,

    /// How long stopping workers get before they are reported as stuck
    #[serde(with = "duration_str")]
    pub grace_period: Duration,

    /// Occupancy sampling period while running
    #[serde(with = "duration_str")]
    pub sample_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact, full)
    pub format: String,

    /// Log every slot event, not just lifecycle transitions
    pub slot_events: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Feed slot events into the Prometheus registry
    pub enable_prometheus: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            producers: 5,
            consumers: 5,
            capacity: 200,
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(4),
            grace_period: Duration::from_secs(5),
            sample_interval: Duration::from_secs(1),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            slot_events: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enable_prometheus: true }
    }
}

impl SimulationConfig {
    /// Run-until-stopped when the duration is zero
    pub fn run_limit(&self) -> Option<Duration> {
        (!self.duration.is_zero()).then_some(self.duration)
    }

    /// Validate simulation parameters
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::config("Buffer capacity must be at least 1"));
        }

        if self.producers > MAX_WORKERS_PER_ROLE || self.consumers > MAX_WORKERS_PER_ROLE {
            return Err(Error::config(format!(
                "Too many workers (maximum {} per role)",
                MAX_WORKERS_PER_ROLE
            )));
        }

        for (name, value) in [
            ("duration", self.duration),
            ("max_delay", self.max_delay),
            ("grace_period", self.grace_period),
            ("sample_interval", self.sample_interval),
        ] {
            if value > MAX_DURATION {
                return Err(Error::config(format!(
                    "{} ({:?}) exceeds the maximum of {:?}",
                    name, value, MAX_DURATION
                )));
            }
        }

        if self.min_delay > self.max_delay {
            return Err(Error::config(format!(
                "min_delay ({:?}) exceeds max_delay ({:?})",
                self.min_delay, self.max_delay
            )));
        }

        if self.grace_period.is_zero() {
            return Err(Error::config("Grace period must be positive"));
        }

        if self.sample_interval.is_zero() {
            return Err(Error::config("Sample interval must be positive"));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from the default file (if present) and environment variables
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            config = Self::from_file(&default_path)?;
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; split out so tests need not touch the process env
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let sim = &mut self.simulation;

        if let Some(value) = lookup("WF_DURATION") {
            sim.duration = parse_duration(&value)
                .map_err(|e| Error::config(format!("Invalid duration: {}", e)))?;
        }

        if let Some(value) = lookup("WF_PRODUCERS") {
            sim.producers = value.parse()
                .map_err(|e| Error::config(format!("Invalid producer count: {}", e)))?;
        }

        if let Some(value) = lookup("WF_CONSUMERS") {
            sim.consumers = value.parse()
                .map_err(|e| Error::config(format!("Invalid consumer count: {}", e)))?;
        }

        if let Some(value) = lookup("WF_CAPACITY") {
            sim.capacity = value.parse()
                .map_err(|e| Error::config(format!("Invalid capacity: {}", e)))?;
        }

        if let Some(value) = lookup("WF_GRACE_PERIOD") {
            sim.grace_period = parse_duration(&value)
                .map_err(|e| Error::config(format!("Invalid grace period: {}", e)))?;
        }

        if let Some(level) = lookup("WF_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("WF_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "full" => {}
            _ => return Err(Error::config("Invalid log format")),
        }

        Ok(())
    }
}

/// Serde adapter storing durations as strings like `"250ms"` or `"30s"`
pub mod duration_str {
    use super::{format_duration, parse_duration};
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;
    use std::time::Duration;

    /// Serialize a duration in its shortest exact unit
    pub fn serialize<S>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*value))
    }

    /// Deserialize a duration from a string, or from a bare integer of seconds
    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration string like '30s' or '250ms'")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Duration, E>
            where
                E: de::Error,
            {
                parse_duration(value).map_err(E::custom)
            }

            fn visit_i64<E>(self, value: i64) -> std::result::Result<Duration, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("negative duration"))
            }

            fn visit_u64<E>(self, value: u64) -> std::result::Result<Duration, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(value))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Parse `"500ns"`, `"250us"`, `"250ms"`, `"30s"`, `"5m"`, `"1h"` or bare seconds
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let number = |digits: &str, unit: &str| -> std::result::Result<u64, String> {
        digits.parse().map_err(|_| format!("Invalid {}: {}", unit, s))
    };
    let scaled = |value: u64, factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("Duration too large: {}", s))
    };

    if let Some(ns) = s.strip_suffix("ns") {
        Ok(Duration::from_nanos(number(ns, "nanoseconds")?))
    } else if let Some(us) = s.strip_suffix("us") {
        Ok(Duration::from_micros(number(us, "microseconds")?))
    } else if let Some(ms) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(number(ms, "milliseconds")?))
    } else if let Some(secs) = s.strip_suffix('s') {
        Ok(Duration::from_secs(number(secs, "seconds")?))
    } else if let Some(mins) = s.strip_suffix('m') {
        scaled(number(mins, "minutes")?, 60)
    } else if let Some(hours) = s.strip_suffix('h') {
        scaled(number(hours, "hours")?, 3600)
    } else {
        Ok(Duration::from_secs(number(s, "duration format")?))
    }
}

/// Inverse of [`parse_duration`], in the coarsest unit that loses nothing
pub fn format_duration(d: Duration) -> String {
    let nanos = d.subsec_nanos();
    if nanos == 0 {
        format!("{}s", d.as_secs())
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else if nanos % 1_000 == 0 {
        format!("{}us", d.as_micros())
    } else {
        format!("{}ns", d.as_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_the_classic_exercise() {
        let config = Config::default();
        assert_eq!(config.simulation.producers, 5);
        assert_eq!(config.simulation.consumers, 5);
        assert_eq!(config.simulation.capacity, 200);
        assert_eq!(config.simulation.duration, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert_eq!(parse_duration("250us"), Ok(Duration::from_micros(250)));
        assert_eq!(parse_duration("40ns"), Ok(Duration::from_nanos(40)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn oversized_durations_are_errors() {
        assert!(parse_duration("9999999999999999h").is_err());
        assert!(parse_duration("999999999999999999m").is_err());

        let mut config = Config::default();
        config.simulation.duration = Duration::from_secs(u64::MAX);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.grace_period = MAX_DURATION + Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.max_delay = Duration::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sub_millisecond_durations_survive_formatting() {
        for d in [
            Duration::from_micros(500),
            Duration::from_nanos(1_500),
            Duration::from_millis(1_250),
            Duration::from_secs(30),
            Duration::ZERO,
        ] {
            assert_eq!(parse_duration(&format_duration(d)), Ok(d));
        }
        assert_eq!(format_duration(Duration::from_micros(500)), "500us");

        let mut config = Config::default();
        config.simulation.grace_period = Duration::from_micros(500);
        let parsed = Config::from_toml(&toml::to_string(&config).unwrap()).unwrap();
        assert_eq!(parsed.simulation.grace_period, Duration::from_micros(500));
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn loads_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[simulation]\nduration = \"2s\"\ncapacity = 8\nmax_delay = \"10ms\"\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.simulation.duration, Duration::from_secs(2));
        assert_eq!(config.simulation.capacity, 8);
        assert_eq!(config.simulation.max_delay, Duration::from_millis(10));
        // untouched fields keep their defaults
        assert_eq!(config.simulation.producers, 5);
        assert_eq!(config.logging.level, "debug");
        assert!(config.metrics.enable_prometheus);
    }

    #[test]
    fn file_and_parse_failures_keep_their_source() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, Error::Io(_)));

        let broken = Config::from_toml("[simulation\ncapacity = 4").unwrap_err();
        assert!(matches!(broken, Error::Toml(_)));

        let bad_duration = Config::from_toml("[simulation]\nduration = \"soon\"").unwrap_err();
        assert!(matches!(bad_duration, Error::Toml(_)));
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut config = Config::default();
        config.simulation.min_delay = Duration::from_millis(5);
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("min_delay = \"5ms\""));
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.simulation, config.simulation);
    }

    #[test]
    fn env_overrides_apply_and_reject_garbage() {
        let vars: HashMap<&str, &str> =
            [("WF_CAPACITY", "1"), ("WF_PRODUCERS", "0"), ("WF_DURATION", "0")].into();
        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.simulation.capacity, 1);
        assert_eq!(config.simulation.producers, 0);
        assert_eq!(config.simulation.run_limit(), None);

        let mut config = Config::default();
        let err = config
            .apply_overrides(|k| (k == "WF_CONSUMERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.simulation.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.min_delay = Duration::from_secs(9);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.grace_period = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }
}
