//! Simulation supervisor
//!
//! Owns the buffer, spawns the worker pool, waits for the run to end and shuts
//! the pool down cooperatively:
//!
//! ```text
//! Idle -> Running -> Stopping -> Idle
//! ```
//!
//! Workers are never killed. A worker that misses the grace period is left
//! running detached and reported in the summary; its buffer is then discarded
//! instead of reset, so the straggler cannot corrupt the next run.

use crate::buffer::BoundedBuffer;
use crate::core::config::{duration_str, SimulationConfig};
use crate::core::{BufferError, Error, Result, Role, Widget, WorkerId};
use crate::system::metrics::{FactoryMetrics, Timer};
use crate::system::{EventSink, TracingReporter};
use crate::worker::{
    Consumer, Pacing, Producer, RunSignal, SerialSource, StopReason, WorkerContext, WorkerReport,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of the supervisor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    /// No run in progress
    Idle,
    /// Workers are exchanging items
    Running,
    /// Stop issued, waiting for workers to exit
    Stopping,
}

/// Non-fatal problems surfaced in a run summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// Workers still running when the grace period ran out
    ShutdownTimeout {
        /// Workers left running, detached
        workers: Vec<WorkerId>,
        /// Grace period they were given
        #[serde(serialize_with = "duration_str::serialize")]
        grace_period: Duration,
    },
    /// A worker exited with an error or panicked
    WorkerFailed {
        /// Which worker
        worker: WorkerId,
        /// Error or panic message
        message: String,
    },
}

/// Outcome of one run
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// Widgets inserted
    pub produced: u64,
    /// Widgets removed
    pub consumed: u64,
    /// Filled slots when the summary was taken
    pub final_occupancy: usize,
    /// Buffer capacity
    pub capacity: usize,
    /// Highest occupancy reached
    pub peak_occupancy: usize,
    /// Invariant samples taken while running
    pub samples: u64,
    /// Wall-clock run time, shutdown included
    #[serde(serialize_with = "duration_str::serialize")]
    pub elapsed: Duration,
    /// Why the run stopped
    pub stop_reason: StopReason,
    /// Per-worker results, producers first
    pub workers: Vec<WorkerReport>,
    /// Non-fatal problems
    pub warnings: Vec<RunWarning>,
}

impl RunSummary {
    /// True when no warning was raised
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Workers reported as stuck after the grace period
    pub fn stuck_workers(&self) -> Vec<WorkerId> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                RunWarning::ShutdownTimeout { workers, .. } => Some(workers.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Signal of the run in progress and the sticky halt flag, locked together
#[derive(Default)]
struct ActiveRun {
    signal: Option<Arc<RunSignal>>,
    halted: bool,
}

/// Cloneable handle to request a stop from another thread and observe the state
#[derive(Clone)]
pub struct StopHandle {
    current: Arc<Mutex<ActiveRun>>,
    state: Arc<Mutex<SupervisorState>>,
}

impl StopHandle {
    /// Ask the running simulation to stop. Returns false if nothing was running
    /// or a stop was already under way.
    pub fn request_stop(&self) -> bool {
        match self.current.lock().signal.as_ref() {
            Some(signal) => signal.stop(StopReason::Requested),
            None => false,
        }
    }

    /// Stop the current run and every later one.
    ///
    /// Never lost between runs: a run that starts after the halt stops before
    /// its gate opens. Returns true if a running simulation was stopped.
    pub fn halt(&self) -> bool {
        let mut active = self.current.lock();
        active.halted = true;
        active
            .signal
            .as_ref()
            .is_some_and(|signal| signal.stop(StopReason::Requested))
    }

    /// Whether [`halt`](Self::halt) was called
    pub fn is_halted(&self) -> bool {
        self.current.lock().halted
    }

    /// Current supervisor state
    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }
}

/// Supervisor-held reference to a running worker
struct WorkerHandle {
    id: WorkerId,
    join: JoinHandle<Result<WorkerReport>>,
}

/// Sends the worker id when the worker thread ends, panics included
struct CompletionGuard {
    id: WorkerId,
    done: Sender<WorkerId>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let _ = self.done.send(self.id);
    }
}

/// What came back from the pool after Stopping
#[derive(Default)]
struct ShutdownOutcome {
    reports: Vec<WorkerReport>,
    warnings: Vec<RunWarning>,
    fatal: Option<Error>,
}

/// Sampling results gathered while Running
#[derive(Default)]
struct Supervision {
    samples: u64,
    fatal: Option<BufferError>,
}

/// Fault injection for the supervisor's own tests
#[cfg(test)]
#[derive(Default)]
struct TestHooks {
    /// Called on the prepared buffer right before the gate opens
    before_open: Option<fn(&BoundedBuffer<Widget>)>,
    /// Spawning fails for the worker at this position (producers first)
    fail_spawn_at: Option<usize>,
}

/// Runs simulations over one owned buffer
pub struct SimulationSupervisor {
    settings: SimulationConfig,
    buffer: Arc<BoundedBuffer<Widget>>,
    sink: Arc<dyn EventSink>,
    state: Arc<Mutex<SupervisorState>>,
    current: Arc<Mutex<ActiveRun>>,
    #[cfg(test)]
    hooks: TestHooks,
}

impl SimulationSupervisor {
    /// Create an idle supervisor; events go to the tracing reporter
    pub fn new(settings: SimulationConfig) -> Result<Self> {
        settings.validate()?;
        let buffer = Arc::new(BoundedBuffer::new(settings.capacity)?);

        Ok(Self {
            settings,
            buffer,
            sink: Arc::new(TracingReporter),
            state: Arc::new(Mutex::new(SupervisorState::Idle)),
            current: Arc::new(Mutex::new(ActiveRun::default())),
            #[cfg(test)]
            hooks: TestHooks::default(),
        })
    }

    /// Replace the event sink
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run parameters
    pub fn settings(&self) -> &SimulationConfig {
        &self.settings
    }

    /// Current state
    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    /// Handle for `request_stop`, valid across runs
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            current: self.current.clone(),
            state: self.state.clone(),
        }
    }

    /// Run one simulation to completion.
    ///
    /// Blocks the calling thread until the duration elapses or a stop is
    /// requested, then until every worker exited or the grace period ran out.
    /// An invariant violation is returned as an error; everything else ends
    /// up in the summary.
    pub fn run(&mut self) -> Result<RunSummary> {
        let started = Instant::now();
        let timer = FactoryMetrics::global().map(|m| Timer::start(m.run_duration.clone()));

        self.prepare_buffer()?;
        let signal = Arc::new(RunSignal::new());
        {
            let mut active = self.current.lock();
            if active.halted {
                signal.stop(StopReason::Requested);
            }
            active.signal = Some(signal.clone());
        }
        self.set_state(SupervisorState::Running);
        info!(
            producers = self.settings.producers,
            consumers = self.settings.consumers,
            capacity = self.settings.capacity,
            duration = ?self.settings.run_limit(),
            "simulation starting"
        );

        let (done_tx, done_rx) = channel::unbounded();
        let mut handles = Vec::with_capacity(self.settings.producers + self.settings.consumers);
        let spawned = self.spawn_pool(&signal, &done_tx, &mut handles);
        drop(done_tx);

        if let Err(err) = spawned {
            warn!(error = %err, "aborting run before any worker started");
            signal.stop(StopReason::Aborted);
            self.set_state(SupervisorState::Stopping);
            self.buffer.close();
            self.shutdown(handles, &done_rx);
            self.finish_run();
            return Err(err);
        }

        self.before_open();
        let supervision = if signal.open() {
            self.supervise(&signal)
        } else {
            Supervision::default()
        };

        self.set_state(SupervisorState::Stopping);
        self.buffer.close();
        info!(reason = ?signal.stop_reason(), "stopping workers");
        let outcome = self.shutdown(handles, &done_rx);

        let snapshot = self.buffer.snapshot();
        let stop_reason = signal.stop_reason().unwrap_or(StopReason::Elapsed);
        self.finish_run();
        if let Some(timer) = timer {
            timer.finish();
        }

        if stop_reason == StopReason::Fatal {
            let err = outcome
                .fatal
                .or_else(|| supervision.fatal.map(Error::from))
                .unwrap_or_else(|| Error::internal("simulation halted without a recorded violation"));
            return Err(err);
        }

        let summary = RunSummary {
            produced: snapshot.inserted,
            consumed: snapshot.removed,
            final_occupancy: snapshot.occupancy,
            capacity: snapshot.capacity,
            peak_occupancy: snapshot.peak_occupancy,
            samples: supervision.samples,
            elapsed: started.elapsed(),
            stop_reason,
            workers: outcome.reports,
            warnings: outcome.warnings,
        };
        info!(
            produced = summary.produced,
            consumed = summary.consumed,
            final_occupancy = summary.final_occupancy,
            reason = ?summary.stop_reason,
            warnings = summary.warnings.len(),
            "simulation finished"
        );
        Ok(summary)
    }

    /// Reset the owned buffer, or replace it if a straggler still holds it
    fn prepare_buffer(&mut self) -> Result<()> {
        let capacity = self.settings.capacity;
        let reusable = Arc::get_mut(&mut self.buffer)
            .map(|buffer| buffer.capacity() == capacity)
            .unwrap_or(false);

        if reusable {
            if let Some(buffer) = Arc::get_mut(&mut self.buffer) {
                buffer.reset();
            }
        } else {
            if Arc::strong_count(&self.buffer) > 1 {
                warn!("a previous run left workers behind, discarding its buffer");
            }
            self.buffer = Arc::new(BoundedBuffer::new(capacity)?);
        }
        Ok(())
    }

    fn spawn_pool(
        &self,
        signal: &Arc<RunSignal>,
        done: &Sender<WorkerId>,
        handles: &mut Vec<WorkerHandle>,
    ) -> Result<()> {
        let serials = Arc::new(SerialSource::new());
        let producers = (0..self.settings.producers).map(|i| WorkerId::new(Role::Producer, i));
        let consumers = (0..self.settings.consumers).map(|i| WorkerId::new(Role::Consumer, i));

        for (position, id) in producers.chain(consumers).enumerate() {
            self.injected_spawn_failure(position, id)?;
            handles.push(self.spawn_worker(id, signal, &serials, done)?);
        }
        debug!(workers = handles.len(), "worker pool spawned");
        Ok(())
    }

    fn spawn_worker(
        &self,
        id: WorkerId,
        signal: &Arc<RunSignal>,
        serials: &Arc<SerialSource>,
        done: &Sender<WorkerId>,
    ) -> Result<WorkerHandle> {
        let ctx = WorkerContext {
            id,
            buffer: self.buffer.clone(),
            signal: signal.clone(),
            sink: self.sink.clone(),
            pacing: Pacing::new(self.settings.min_delay, self.settings.max_delay),
            serials: serials.clone(),
        };
        let guard = CompletionGuard { id, done: done.clone() };

        let join = thread::Builder::new()
            .name(id.thread_name())
            .spawn(move || {
                let _guard = guard;
                match id.role {
                    Role::Producer => Producer::new(ctx).run(),
                    Role::Consumer => Consumer::new(ctx).run(),
                }
            })
            .map_err(|source| Error::WorkerSpawn { worker: id, source })?;

        Ok(WorkerHandle { id, join })
    }

    /// Wait in Running until a stop or the deadline, sampling the buffer on the way
    fn supervise(&self, signal: &RunSignal) -> Supervision {
        let mut supervision = Supervision::default();
        let interval = self.settings.sample_interval;
        // a limit past the end of representable time is no limit at all
        let deadline = self
            .settings
            .run_limit()
            .and_then(|limit| Instant::now().checked_add(limit));

        loop {
            let wait = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(interval),
                None => interval,
            };
            if signal.wait_stop_for(wait).is_some() {
                return supervision;
            }

            supervision.samples += 1;
            match self.buffer.check() {
                Ok(snapshot) => {
                    debug!(
                        occupancy = snapshot.occupancy,
                        produced = snapshot.inserted,
                        consumed = snapshot.removed,
                        "buffer sample"
                    );
                    if let Some(metrics) = FactoryMetrics::global() {
                        metrics.buffer_occupancy.set(snapshot.occupancy as i64);
                    }
                }
                Err(err) => {
                    signal.stop(StopReason::Fatal);
                    supervision.fatal = Some(err);
                    return supervision;
                }
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                signal.stop(StopReason::Elapsed);
                return supervision;
            }
        }
    }

    /// Collect workers until all reported done or the grace period runs out
    fn shutdown(&self, handles: Vec<WorkerHandle>, done: &Receiver<WorkerId>) -> ShutdownOutcome {
        let grace_period = self.settings.grace_period;
        let deadline = Instant::now().checked_add(grace_period);
        let order: Vec<WorkerId> = handles.iter().map(|h| h.id).collect();
        let mut pending: HashMap<WorkerId, WorkerHandle> =
            handles.into_iter().map(|h| (h.id, h)).collect();
        let mut finished = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let received = match deadline {
                Some(deadline) => done.recv_deadline(deadline),
                None => done.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(id) => finished.extend(pending.remove(&id)),
                Err(RecvTimeoutError::Disconnected) => {
                    // every guard has fired
                    finished.extend(pending.drain().map(|(_, h)| h));
                }
                Err(RecvTimeoutError::Timeout) => break,
            }
        }

        let mut outcome = ShutdownOutcome::default();
        let mut results: HashMap<WorkerId, WorkerReport> = HashMap::new();
        for handle in finished {
            let id = handle.id;
            match handle.join.join() {
                Ok(Ok(report)) => {
                    results.insert(id, report);
                }
                Ok(Err(err)) if err.is_fatal() => {
                    outcome.fatal.get_or_insert(err);
                }
                Ok(Err(err)) => outcome.warnings.push(RunWarning::WorkerFailed {
                    worker: id,
                    message: err.to_string(),
                }),
                Err(panic) => {
                    warn!(worker = %id, "worker panicked");
                    outcome.warnings.push(RunWarning::WorkerFailed {
                        worker: id,
                        message: panic_message(panic),
                    });
                }
            }
        }

        outcome.reports = order.iter().filter_map(|id| results.remove(id)).collect();

        if !pending.is_empty() {
            let mut stuck: Vec<WorkerId> = pending.into_keys().collect();
            stuck.sort();
            warn!(workers = ?stuck, ?grace_period, "workers did not stop within the grace period");
            if let Some(metrics) = FactoryMetrics::global() {
                metrics.shutdown_timeouts.inc_by(stuck.len() as u64);
            }
            outcome.warnings.push(RunWarning::ShutdownTimeout {
                workers: stuck,
                grace_period,
            });
        }

        outcome
    }

    #[cfg(test)]
    fn before_open(&self) {
        if let Some(hook) = self.hooks.before_open {
            hook(&self.buffer);
        }
    }

    #[cfg(not(test))]
    fn before_open(&self) {}

    #[cfg(test)]
    fn injected_spawn_failure(&self, position: usize, worker: WorkerId) -> Result<()> {
        if self.hooks.fail_spawn_at == Some(position) {
            return Err(Error::WorkerSpawn {
                worker,
                source: std::io::Error::new(std::io::ErrorKind::Other, "thread limit reached"),
            });
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_spawn_failure(&self, _position: usize, _worker: WorkerId) -> Result<()> {
        Ok(())
    }

    fn finish_run(&self) {
        self.current.lock().signal = None;
        self.set_state(SupervisorState::Idle);
        if let Some(metrics) = FactoryMetrics::global() {
            metrics.runs.inc();
        }
    }

    fn set_state(&self, state: SupervisorState) {
        let mut current = self.state.lock();
        debug!(from = ?*current, to = ?state, "supervisor transition");
        *current = state;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}
