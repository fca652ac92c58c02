//! Fixed-capacity circular buffer shared by producers and consumers
//!
//! Waiting and mutating are split. Two counting semaphores (`free`, `filled`)
//! provide back-pressure and let any number of workers block independently;
//! a short mutex section touches only the slot, the two indices and the
//! occupancy counter, and never sleeps.
//!
//! Reservations are RAII guards: a reservation that is dropped without being
//! used hands its permit back, so a worker that bails out during shutdown
//! cannot leak one.

use crate::core::{BufferError, Error, Result, SlotReceipt};
use super::semaphore::Semaphore;
use parking_lot::Mutex;
use serde::Serialize;

/// Point-in-time view of the buffer's counters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BufferSnapshot {
    /// Slot count
    pub capacity: usize,
    /// Next insertion index
    pub head: usize,
    /// Next removal index
    pub tail: usize,
    /// Filled slots
    pub occupancy: usize,
    /// Highest occupancy since the last reset
    pub peak_occupancy: usize,
    /// Items inserted since the last reset
    pub inserted: u64,
    /// Items removed since the last reset
    pub removed: u64,
    /// Whether the buffer refuses new reservations
    pub closed: bool,
}

/// State guarded by the exclusive section
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    occupancy: usize,
    peak: usize,
    inserted: u64,
    removed: u64,
    next_sequence: u64,
    poisoned: Option<BufferError>,
}

/// Bounded buffer with blocking reservations
pub struct BoundedBuffer<T> {
    capacity: usize,
    ring: Mutex<Ring<T>>,
    free: Semaphore,
    filled: Semaphore,
}

/// Right to write exactly one slot, obtained from
/// [`BoundedBuffer::try_reserve_slot_for_insert`]
#[must_use = "dropping a reservation gives the slot back"]
pub struct InsertSlot<'a, T> {
    buffer: &'a BoundedBuffer<T>,
    armed: bool,
}

/// Right to read exactly one slot, obtained from
/// [`BoundedBuffer::try_reserve_slot_for_remove`]
#[must_use = "dropping a reservation gives the slot back"]
pub struct RemoveSlot<'a, T> {
    buffer: &'a BoundedBuffer<T>,
    armed: bool,
}

impl<T> Ring<T> {
    fn empty(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            occupancy: 0,
            peak: 0,
            inserted: 0,
            removed: 0,
            next_sequence: 0,
            poisoned: None,
        }
    }

    fn insert(&mut self, item: T) -> std::result::Result<SlotReceipt, BufferError> {
        self.check_poison()?;
        let capacity = self.slots.len();
        let slot = self.head;
        if self.slots[slot].is_some() {
            return Err(self.poison(self.occupancy as isize, format!("insert would overwrite slot {}", slot)));
        }

        self.slots[slot] = Some(item);
        self.head = (self.head + 1) % capacity;
        self.occupancy += 1;
        self.inserted += 1;
        self.verify()?;
        self.peak = self.peak.max(self.occupancy);

        Ok(self.receipt(slot))
    }

    fn remove(&mut self) -> std::result::Result<(T, SlotReceipt), BufferError> {
        self.check_poison()?;
        let capacity = self.slots.len();
        let slot = self.tail;
        let item = match self.slots[slot].take() {
            Some(item) => item,
            None => {
                return Err(self.poison(self.occupancy as isize, format!("remove from empty slot {}", slot)));
            }
        };

        self.tail = (self.tail + 1) % capacity;
        self.occupancy = match self.occupancy.checked_sub(1) {
            Some(occupancy) => occupancy,
            None => return Err(self.poison(-1, "occupancy underflow".to_string())),
        };
        self.removed += 1;
        self.verify()?;

        Ok((item, self.receipt(slot)))
    }

    fn receipt(&mut self, slot: usize) -> SlotReceipt {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        SlotReceipt { slot, occupancy: self.occupancy, sequence }
    }

    /// Full invariant check; any failure poisons the ring
    fn verify(&mut self) -> std::result::Result<(), BufferError> {
        self.check_poison()?;
        let capacity = self.slots.len();
        let occupancy = self.occupancy;

        if occupancy > capacity {
            return Err(self.poison(occupancy as isize, "occupancy above capacity".to_string()));
        }
        if (self.head + capacity - self.tail) % capacity != occupancy % capacity {
            return Err(self.poison(
                occupancy as isize,
                format!("indices disagree with occupancy (head {}, tail {})", self.head, self.tail),
            ));
        }
        if self.inserted.checked_sub(self.removed) != Some(occupancy as u64) {
            return Err(self.poison(
                occupancy as isize,
                format!("{} inserted, {} removed", self.inserted, self.removed),
            ));
        }

        Ok(())
    }

    fn check_poison(&self) -> std::result::Result<(), BufferError> {
        match &self.poisoned {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn poison(&mut self, occupancy: isize, detail: String) -> BufferError {
        let err = BufferError::InvariantViolation {
            occupancy,
            capacity: self.slots.len(),
            detail,
        };
        self.poisoned = Some(err.clone());
        err
    }
}

impl<T> BoundedBuffer<T> {
    /// Create an empty buffer with `capacity` slots
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_input("buffer capacity must be at least 1"));
        }

        Ok(Self {
            capacity,
            ring: Mutex::new(Ring::empty(capacity)),
            free: Semaphore::new(capacity),
            filled: Semaphore::new(0),
        })
    }

    /// Number of slots, fixed at construction
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Filled slots right now
    pub fn occupancy(&self) -> usize {
        self.ring.lock().occupancy
    }

    /// Block until a free slot exists and reserve it.
    ///
    /// Fails with [`BufferError::Closed`] once the buffer is closed, including
    /// for callers that were already waiting.
    pub fn try_reserve_slot_for_insert(&self) -> std::result::Result<InsertSlot<'_, T>, BufferError> {
        self.free.acquire()?;
        Ok(InsertSlot { buffer: self, armed: true })
    }

    /// Block until a filled slot exists and reserve it
    pub fn try_reserve_slot_for_remove(&self) -> std::result::Result<RemoveSlot<'_, T>, BufferError> {
        self.filled.acquire()?;
        Ok(RemoveSlot { buffer: self, armed: true })
    }

    /// Reserve a free slot only if one is available right now
    pub fn reserve_slot_for_insert_nowait(&self) -> std::result::Result<Option<InsertSlot<'_, T>>, BufferError> {
        Ok(self.free.try_acquire()?.then(|| InsertSlot { buffer: self, armed: true }))
    }

    /// Reserve a filled slot only if one is available right now
    pub fn reserve_slot_for_remove_nowait(&self) -> std::result::Result<Option<RemoveSlot<'_, T>>, BufferError> {
        Ok(self.filled.try_acquire()?.then(|| RemoveSlot { buffer: self, armed: true }))
    }

    /// Wake every blocked reservation with [`BufferError::Closed`] and refuse new ones.
    ///
    /// Reservations already granted can still be committed.
    pub fn close(&self) {
        self.free.close();
        self.filled.close();
    }

    /// Whether the buffer refuses new reservations
    pub fn is_closed(&self) -> bool {
        self.free.is_closed()
    }

    /// Snapshot the counters after re-checking every invariant
    pub fn check(&self) -> std::result::Result<BufferSnapshot, BufferError> {
        let result = {
            let mut ring = self.ring.lock();
            ring.verify().map(|_| self.snapshot_locked(&ring))
        };
        result.map_err(|err| self.fail(err))
    }

    /// Snapshot the counters without validation
    pub fn snapshot(&self) -> BufferSnapshot {
        let ring = self.ring.lock();
        self.snapshot_locked(&ring)
    }

    /// Back to the empty, open state. Exclusive access guarantees no worker holds a reservation.
    pub fn reset(&mut self) {
        *self.ring.get_mut() = Ring::empty(self.capacity);
        self.free.reset(self.capacity);
        self.filled.reset(0);
    }

    fn snapshot_locked(&self, ring: &Ring<T>) -> BufferSnapshot {
        BufferSnapshot {
            capacity: self.capacity,
            head: ring.head,
            tail: ring.tail,
            occupancy: ring.occupancy,
            peak_occupancy: ring.peak,
            inserted: ring.inserted,
            removed: ring.removed,
            closed: self.free.is_closed(),
        }
    }

    /// Called outside the exclusive section once the ring reported a violation
    fn fail(&self, err: BufferError) -> BufferError {
        tracing::error!(error = %err, "bounded buffer corrupted");
        self.close();
        err
    }

    fn commit_insert(&self, item: T) -> std::result::Result<SlotReceipt, BufferError> {
        let committed = self.ring.lock().insert(item);
        match committed {
            Ok(receipt) => {
                self.filled.release();
                Ok(receipt)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn commit_remove(&self) -> std::result::Result<(T, SlotReceipt), BufferError> {
        let committed = self.ring.lock().remove();
        match committed {
            Ok(removed) => {
                self.free.release();
                Ok(removed)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_occupancy(&self, occupancy: usize) {
        self.ring.lock().occupancy = occupancy;
    }
}

impl<'a, T> InsertSlot<'a, T> {
    /// Write `item` at `head`, advance `head` and bump occupancy, then signal consumers
    pub fn insert(mut self, item: T) -> std::result::Result<SlotReceipt, BufferError> {
        self.armed = false;
        self.buffer.commit_insert(item)
    }
}

impl<'a, T> Drop for InsertSlot<'a, T> {
    fn drop(&mut self) {
        if self.armed {
            self.buffer.free.release();
        }
    }
}

impl<'a, T> RemoveSlot<'a, T> {
    /// Take the item at `tail`, advance `tail` and drop occupancy, then signal producers
    pub fn remove(mut self) -> std::result::Result<(T, SlotReceipt), BufferError> {
        self.armed = false;
        self.buffer.commit_remove()
    }
}

impl<'a, T> Drop for RemoveSlot<'a, T> {
    fn drop(&mut self) {
        if self.armed {
            self.buffer.filled.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(BoundedBuffer::<u32>::new(0), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn items_come_out_in_slot_order() {
        let buffer = BoundedBuffer::new(3).unwrap();
        for v in [10, 20, 30] {
            buffer.try_reserve_slot_for_insert().unwrap().insert(v).unwrap();
        }
        assert_eq!(buffer.occupancy(), 3);

        let (first, receipt) = buffer.try_reserve_slot_for_remove().unwrap().remove().unwrap();
        assert_eq!(first, 10);
        assert_eq!(receipt.slot, 0);
        assert_eq!(receipt.occupancy, 2);

        // wrap around
        let receipt = buffer.try_reserve_slot_for_insert().unwrap().insert(40).unwrap();
        assert_eq!(receipt.slot, 0);
        assert_eq!(receipt.occupancy, 3);

        let drained: Vec<_> = (0..3)
            .map(|_| buffer.try_reserve_slot_for_remove().unwrap().remove().unwrap().0)
            .collect();
        assert_eq!(drained, vec![20, 30, 40]);
        assert_eq!(buffer.snapshot().peak_occupancy, 3);
        assert_eq!(buffer.snapshot().head, 1);
        assert_eq!(buffer.snapshot().tail, 1);
    }

    #[test]
    fn sequences_are_dense_and_ordered() {
        let buffer = BoundedBuffer::new(2).unwrap();
        let a = buffer.try_reserve_slot_for_insert().unwrap().insert('a').unwrap();
        let (_, b) = buffer.try_reserve_slot_for_remove().unwrap().remove().unwrap();
        let c = buffer.try_reserve_slot_for_insert().unwrap().insert('c').unwrap();
        assert_eq!((a.sequence, b.sequence, c.sequence), (0, 1, 2));
    }

    #[test]
    fn full_buffer_refuses_nowait_reservation() {
        let buffer = BoundedBuffer::new(1).unwrap();
        buffer.try_reserve_slot_for_insert().unwrap().insert(1).unwrap();
        assert!(buffer.reserve_slot_for_insert_nowait().unwrap().is_none());
        assert!(buffer.reserve_slot_for_remove_nowait().unwrap().is_some());
    }

    #[test]
    fn dropped_reservation_returns_its_permit() {
        let buffer = BoundedBuffer::<u8>::new(1).unwrap();
        let slot = buffer.try_reserve_slot_for_insert().unwrap();
        assert!(buffer.reserve_slot_for_insert_nowait().unwrap().is_none());
        drop(slot);

        let slot = buffer.reserve_slot_for_insert_nowait().unwrap();
        assert!(slot.is_some());
        drop(slot);
        assert_eq!(buffer.occupancy(), 0);
        assert!(buffer.reserve_slot_for_remove_nowait().unwrap().is_none());
    }

    #[test]
    fn producer_blocks_until_consumer_frees_a_slot() {
        let buffer = Arc::new(BoundedBuffer::new(1).unwrap());
        buffer.try_reserve_slot_for_insert().unwrap().insert(1u32).unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.try_reserve_slot_for_insert().map(|slot| slot.insert(2).unwrap()))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!producer.is_finished());
        assert_eq!(buffer.occupancy(), 1);

        let (item, _) = buffer.try_reserve_slot_for_remove().unwrap().remove().unwrap();
        assert_eq!(item, 1);
        let receipt = producer.join().unwrap().unwrap();
        assert_eq!(receipt.slot, 0);
        assert_eq!(buffer.occupancy(), 1);
    }

    #[test]
    fn close_releases_blocked_consumers() {
        let buffer = Arc::new(BoundedBuffer::<u32>::new(4).unwrap());
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.try_reserve_slot_for_remove().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        buffer.close();
        assert_eq!(consumer.join().unwrap(), Err(BufferError::Closed));
        assert!(buffer.is_closed());
    }

    #[test]
    fn granted_reservation_commits_after_close() {
        let buffer = BoundedBuffer::new(2).unwrap();
        let slot = buffer.try_reserve_slot_for_insert().unwrap();
        buffer.close();
        assert!(slot.insert(5).is_ok());
        assert_eq!(buffer.occupancy(), 1);
        assert!(matches!(buffer.try_reserve_slot_for_remove(), Err(BufferError::Closed)));
    }

    #[test]
    fn reset_restores_empty_open_state() {
        let mut buffer = BoundedBuffer::new(2).unwrap();
        buffer.try_reserve_slot_for_insert().unwrap().insert(1).unwrap();
        buffer.close();
        buffer.reset();

        let snap = buffer.check().unwrap();
        assert_eq!(snap, BufferSnapshot {
            capacity: 2, head: 0, tail: 0, occupancy: 0, peak_occupancy: 0, inserted: 0, removed: 0, closed: false,
        });
        let receipt = buffer.try_reserve_slot_for_insert().unwrap().insert(9).unwrap();
        assert_eq!(receipt.sequence, 0);
    }

    #[test]
    fn corrupted_counter_poisons_and_closes() {
        let buffer = BoundedBuffer::new(4).unwrap();
        buffer.try_reserve_slot_for_insert().unwrap().insert(1).unwrap();
        buffer.corrupt_occupancy(7);

        let err = buffer.check().unwrap_err();
        assert!(matches!(err, BufferError::InvariantViolation { occupancy: 7, capacity: 4, .. }));
        assert!(buffer.is_closed());

        // every later commit reports the same violation
        let slot = buffer.reserve_slot_for_insert_nowait();
        assert_eq!(slot.err(), Some(BufferError::Closed));
        assert_eq!(buffer.check().unwrap_err(), err);
    }

    #[test]
    fn commit_on_corrupted_counter_fails() {
        let buffer = BoundedBuffer::new(4).unwrap();
        let slot = buffer.try_reserve_slot_for_insert().unwrap();
        buffer.corrupt_occupancy(4);
        let err = slot.insert(1).unwrap_err();
        assert!(matches!(err, BufferError::InvariantViolation { occupancy: 5, .. }));
        assert!(buffer.is_closed());
    }

    proptest! {
        #[test]
        fn behaves_like_a_bounded_queue(capacity in 1usize..8, ops in prop::collection::vec(any::<bool>(), 0..200)) {
            let buffer = BoundedBuffer::new(capacity).unwrap();
            let mut model = VecDeque::new();
            let mut next = 0u32;

            for insert in ops {
                if insert {
                    match buffer.reserve_slot_for_insert_nowait().unwrap() {
                        Some(slot) => {
                            prop_assert!(model.len() < capacity);
                            let receipt = slot.insert(next).unwrap();
                            model.push_back(next);
                            prop_assert_eq!(receipt.occupancy, model.len());
                            next += 1;
                        }
                        None => { prop_assert_eq!(model.len(), capacity); }
                    }
                } else {
                    match buffer.reserve_slot_for_remove_nowait().unwrap() {
                        Some(slot) => {
                            let (item, receipt) = slot.remove().unwrap();
                            prop_assert_eq!(Some(item), model.pop_front());
                            prop_assert_eq!(receipt.occupancy, model.len());
                        }
                        None => { prop_assert!(model.is_empty()); }
                    }
                }

                let snap = buffer.check().unwrap();
                prop_assert!(snap.occupancy <= capacity);
                prop_assert_eq!(snap.inserted - snap.removed, snap.occupancy as u64);
            }
        }
    }
}
