//! Error types and handling for the widget factory
//!
//! Buffer-level failures live in [`BufferError`] so workers can tell a
//! shutdown wake-up apart from a corrupted buffer without string matching.

use crate::core::types::WorkerId;
use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the widget factory
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input passed to a public entry point
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Bounded buffer errors
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// A worker thread could not be started
    #[error("Failed to spawn {worker}: {source}")]
    WorkerSpawn {
        /// Worker that failed to start
        worker: WorkerId,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Internal system errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// JSON rendering errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors raised by the bounded buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer was closed while waiting for a slot
    #[error("buffer closed")]
    Closed,

    /// Occupancy or slot state escaped its bounds. Never recovered from.
    #[error("invariant violated: {detail} (occupancy {occupancy}, capacity {capacity})")]
    InvariantViolation {
        /// Occupancy observed when the violation was detected
        occupancy: isize,
        /// Buffer capacity
        capacity: usize,
        /// What was found
        detail: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error must halt the whole simulation
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Buffer(BufferError::InvariantViolation { .. }))
    }
}

impl BufferError {
    /// Check if this is the shutdown wake-up rather than a failure
    pub fn is_closed(&self) -> bool {
        matches!(self, BufferError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;

    #[test]
    fn only_invariant_violations_are_fatal() {
        let violation = Error::from(BufferError::InvariantViolation {
            occupancy: -1,
            capacity: 4,
            detail: "occupancy underflow".into(),
        });
        assert!(violation.is_fatal());
        assert!(!Error::from(BufferError::Closed).is_fatal());
        assert!(!Error::config("bad").is_fatal());
    }

    #[test]
    fn spawn_failure_names_the_worker() {
        let err = Error::WorkerSpawn {
            worker: WorkerId::new(Role::Consumer, 3),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no threads left"),
        };
        assert_eq!(err.to_string(), "Failed to spawn consumer 3: no threads left");
    }
}
