//! Bounded buffer and its counting synchronizers

pub mod bounded;
pub mod semaphore;

pub use bounded::{BoundedBuffer, BufferSnapshot, InsertSlot, RemoveSlot};
pub use semaphore::Semaphore;
