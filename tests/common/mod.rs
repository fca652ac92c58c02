//! Shared helpers for the simulation integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use widget_factory::core::config::SimulationConfig;
use widget_factory::core::{Role, SlotEvent};
use widget_factory::EventSink;

/// Keeps every slot event for later replay
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SlotEvent>>,
}

impl RecordingSink {
    /// Events in buffer mutation order
    pub fn by_sequence(&self) -> Vec<SlotEvent> {
        let mut events = self.events.lock().clone();
        events.sort_by_key(|e| e.sequence);
        events
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &SlotEvent) {
        self.events.lock().push(*event);
    }
}

/// Blocks the recording worker while `slow` is set
pub struct StallingSink {
    pub slow: AtomicBool,
    pub stall: Duration,
}

impl StallingSink {
    pub fn new(stall: Duration) -> Self {
        Self {
            slow: AtomicBool::new(true),
            stall,
        }
    }
}

impl EventSink for StallingSink {
    fn record(&self, _event: &SlotEvent) {
        if self.slow.load(Ordering::Acquire) {
            std::thread::sleep(self.stall);
        }
    }
}

/// Panics on every producer event, passes consumer events through
#[derive(Default)]
pub struct PanickingSink;

impl EventSink for PanickingSink {
    fn record(&self, event: &SlotEvent) {
        if event.worker.role == Role::Producer {
            panic!("sink exploded");
        }
    }
}

/// Short run with sub-millisecond pacing
pub fn settings(producers: usize, consumers: usize, capacity: usize, duration: Duration) -> SimulationConfig {
    SimulationConfig {
        duration,
        producers,
        consumers,
        capacity,
        min_delay: Duration::ZERO,
        max_delay: Duration::from_micros(500),
        grace_period: Duration::from_secs(5),
        sample_interval: Duration::from_millis(20),
    }
}
