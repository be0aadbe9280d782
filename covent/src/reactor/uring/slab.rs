use crate::error::Error;
use slab::{Slab, VacantEntry};
use std::task::Waker;

/// Per-request state, keyed by the entry's `user_data`.
#[derive(Debug)]
pub(crate) enum Slot {
    /// In flight, resume this waker on completion.
    Submitted(Waker),

    /// Completion arrived, waiting for the adapter to pick it up.
    Completed { res: i32, flags: u32 },

    /// The adapter is gone, discard the completion when it arrives.
    Orphaned,
}

/// Fixed capacity slab of in-flight requests.
///
/// Insertion follows a "Reserve-Commit" pattern so a key is only occupied
/// once the entry carrying it was successfully queued on the ring.
pub(crate) struct SlotSlab {
    slab: Slab<Slot>,
    capacity: usize,
}

impl SlotSlab {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slab: Slab::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn reserve_entry(&mut self) -> Result<SlabReservedEntry<'_>, Error> {
        if self.slab.len() >= self.capacity {
            return Err(Error::SubmissionQueueFull);
        }

        Ok(SlabReservedEntry {
            entry: self.slab.vacant_entry(),
        })
    }

    pub(crate) fn get_mut(&mut self, key: usize) -> Option<&mut Slot> {
        self.slab.get_mut(key)
    }

    pub(crate) fn remove(&mut self, key: usize) -> Option<Slot> {
        self.slab.try_remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

pub(crate) struct SlabReservedEntry<'a> {
    entry: VacantEntry<'a, Slot>,
}

impl<'a> SlabReservedEntry<'a> {
    /// Key the slot will have once committed.
    pub(crate) fn key(&self) -> usize {
        self.entry.key()
    }

    pub(crate) fn commit(self, slot: Slot) -> &'a mut Slot {
        self.entry.insert(slot)
    }
}
