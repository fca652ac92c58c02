//! Counting semaphore that can be closed
//!
//! `acquire` is a real blocking wait on a condition variable. Closing wakes
//! every waiter and makes them fail with [`BufferError::Closed`], which is how
//! a stopping worker gets out of a reservation wait without holding a permit.

use crate::core::BufferError;
use parking_lot::{Condvar, Mutex};

struct Permits {
    available: usize,
    closed: bool,
}

/// Counting synchronizer tracking free or filled slots
pub struct Semaphore {
    state: Mutex<Permits>,
    changed: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` permits
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(Permits { available: permits, closed: false }),
            changed: Condvar::new(),
        }
    }

    /// Block until a permit is available and take it.
    ///
    /// Fails only once the semaphore is closed; a closed semaphore refuses
    /// permits even if some are still available.
    pub fn acquire(&self) -> Result<(), BufferError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(BufferError::Closed);
            }
            if state.available > 0 {
                state.available -= 1;
                return Ok(());
            }
            self.changed.wait(&mut state);
        }
    }

    /// Take a permit without blocking
    pub fn try_acquire(&self) -> Result<bool, BufferError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BufferError::Closed);
        }
        if state.available == 0 {
            return Ok(false);
        }
        state.available -= 1;
        Ok(true)
    }

    /// Return a permit and wake one waiter
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.available += 1;
        drop(state);
        self.changed.notify_one();
    }

    /// Refuse all further acquisitions and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }

    /// Whether [`close`](Self::close) was called since the last reset
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Permits currently available
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Reopen with a fresh permit count. Exclusive access means nobody is waiting.
    pub fn reset(&mut self, permits: usize) {
        let state = self.state.get_mut();
        state.available = permits;
        state.closed = false;
    }
}
