//! Per-run start gate and stop signal
//!
//! One [`RunSignal`] is created for every run and shared by the supervisor and
//! all of that run's workers. Workers park on it while the pool is being
//! spawned, and use it for their production/consumption delay so a stop
//! request cuts the delay short instead of waiting it out.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Why a run left the Running state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// The configured duration elapsed
    Elapsed,
    /// `request_stop` was called
    Requested,
    /// The run never started, e.g. a worker failed to spawn
    Aborted,
    /// An invariant violation halted the simulation
    Fatal,
}

/// Lifecycle of one run as seen by its workers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Workers are being spawned; nobody may touch the buffer yet
    Starting,
    /// Workers are exchanging items
    Running,
    /// Workers must finish their current step and exit
    Stopping(StopReason),
}

impl Phase {
    /// Stop reason, if stopping
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            Phase::Stopping(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Shared phase plus a condition variable to wait on it
pub struct RunSignal {
    phase: Mutex<Phase>,
    changed: Condvar,
}

impl RunSignal {
    /// New signal in the Starting phase
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Starting),
            changed: Condvar::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Let the workers go. Returns false if a stop arrived before the gate opened.
    pub fn open(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase != Phase::Starting {
            return false;
        }
        *phase = Phase::Running;
        drop(phase);
        self.changed.notify_all();
        true
    }

    /// Move to Stopping. The first reason wins, except that `Fatal` overrides any other.
    ///
    /// Returns true if this call changed the phase.
    pub fn stop(&self, reason: StopReason) -> bool {
        let mut phase = self.phase.lock();
        let changed = match *phase {
            Phase::Stopping(StopReason::Fatal) => false,
            Phase::Stopping(_) => reason == StopReason::Fatal,
            Phase::Starting | Phase::Running => true,
        };
        if changed {
            *phase = Phase::Stopping(reason);
            drop(phase);
            self.changed.notify_all();
        }
        changed
    }

    /// Whether a stop was issued
    pub fn is_stopping(&self) -> bool {
        self.phase.lock().stop_reason().is_some()
    }

    /// Stop reason, if any
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.phase.lock().stop_reason()
    }

    /// Block while the pool is still being spawned. True if the run actually started.
    pub fn wait_until_open(&self) -> bool {
        let mut phase = self.phase.lock();
        self.changed.wait_while(&mut phase, |p| *p == Phase::Starting);
        *phase == Phase::Running
    }

    /// Suspend for `delay`, waking early on stop. Returns true if the caller should exit.
    pub fn pause(&self, delay: Duration) -> bool {
        self.wait_stop_for(delay).is_some()
    }

    /// Wait up to `timeout` for a stop; `None` means the timeout ran out first.
    ///
    /// A timeout too large to express as an `Instant` waits for the stop alone.
    pub fn wait_stop_for(&self, timeout: Duration) -> Option<StopReason> {
        let mut phase = self.phase.lock();
        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                self.changed.wait_while_until(&mut phase, |p| p.stop_reason().is_none(), deadline);
            }
            None => self.changed.wait_while(&mut phase, |p| p.stop_reason().is_none()),
        }
        phase.stop_reason()
    }
}

impl Default for RunSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn gate_releases_waiters_on_open() {
        let signal = Arc::new(RunSignal::new());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_until_open())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        assert!(signal.open());
        assert!(waiter.join().unwrap());
        assert_eq!(signal.phase(), Phase::Running);
    }

    #[test]
    fn stop_before_open_aborts_the_gate() {
        let signal = RunSignal::new();
        assert!(signal.stop(StopReason::Aborted));
        assert!(!signal.open());
        assert!(!signal.wait_until_open());
    }

    #[test]
    fn first_reason_wins_unless_fatal() {
        let signal = RunSignal::new();
        signal.open();
        assert!(signal.stop(StopReason::Requested));
        assert!(!signal.stop(StopReason::Elapsed));
        assert_eq!(signal.stop_reason(), Some(StopReason::Requested));
        assert!(signal.stop(StopReason::Fatal));
        assert!(!signal.stop(StopReason::Requested));
        assert_eq!(signal.stop_reason(), Some(StopReason::Fatal));
    }

    #[test]
    fn pause_is_cut_short_by_stop() {
        let signal = Arc::new(RunSignal::new());
        signal.open();
        let sleeper = {
            let signal = signal.clone();
            thread::spawn(move || {
                let started = Instant::now();
                (signal.pause(Duration::from_secs(30)), started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        signal.stop(StopReason::Requested);
        let (stopped, slept) = sleeper.join().unwrap();
        assert!(stopped);
        assert!(slept < Duration::from_secs(5));
    }

    #[test]
    fn unrepresentable_timeout_still_wakes_on_stop() {
        let signal = Arc::new(RunSignal::new());
        signal.open();
        let sleeper = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_stop_for(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        signal.stop(StopReason::Requested);
        assert_eq!(sleeper.join().unwrap(), Some(StopReason::Requested));
    }

    #[test]
    fn pause_runs_out_without_stop() {
        let signal = RunSignal::new();
        signal.open();
        assert!(!signal.pause(Duration::from_millis(5)));
        assert_eq!(signal.wait_stop_for(Duration::ZERO), None);
    }
}
