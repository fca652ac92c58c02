//! Type definitions shared by the buffer, the workers and the reporters
//!
//! Items flowing through the buffer are opaque to it; [`Widget`] is what the
//! producers fabricate, but the buffer itself is generic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Item fabricated by a producer and eaten by a consumer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Widget {
    /// Unique within one simulation run
    pub serial: u64,
    /// Random payload
    pub value: u32,
}

/// Which side of the buffer a worker sits on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Inserts widgets
    Producer,
    /// Removes widgets
    Consumer,
}

/// Identity of a worker within one run: its role and index in that role's pool
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId {
    /// Producer or consumer
    pub role: Role,
    /// 0..P-1 for producers, 0..C-1 for consumers
    pub index: usize,
}

/// Result of one committed buffer mutation, captured inside the exclusive section
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReceipt {
    /// Slot index written or read
    pub slot: usize,
    /// Occupancy right after the mutation
    pub occupancy: usize,
    /// Position of this mutation in the buffer's total order of mutations
    pub sequence: u64,
}

/// Observability event emitted after every insert/remove
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEvent {
    /// Worker that performed the mutation
    pub worker: WorkerId,
    /// Slot index used
    pub slot: usize,
    /// Occupancy right after the mutation
    pub occupancy: usize,
    /// Mutation order, see [`SlotReceipt::sequence`]
    pub sequence: u64,
    /// Serial of the widget moved
    pub serial: u64,
}

impl Role {
    /// Lowercase name used in logs and thread names
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkerId {
    /// Create a worker id
    pub fn new(role: Role, index: usize) -> Self {
        Self { role, index }
    }

    /// Name given to the worker's OS thread
    pub fn thread_name(&self) -> String {
        format!("{}-{}", self.role, self.index)
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({}#{})", self.role, self.index)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role, self.index)
    }
}

impl SlotEvent {
    /// Build an event from a receipt
    pub fn new(worker: WorkerId, receipt: SlotReceipt, serial: u64) -> Self {
        Self {
            worker,
            slot: receipt.slot,
            occupancy: receipt.occupancy,
            sequence: receipt.sequence,
            serial,
        }
    }

    /// Role of the worker that emitted this event
    pub fn role(&self) -> Role {
        self.worker.role
    }
}
