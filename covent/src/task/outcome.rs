use crate::error::{Error, Failure};
use log::debug;
use std::cell::{Cell, UnsafeCell};
use std::mem;

pub(crate) enum Slot<T> {
    Empty,
    Value(T),
    Failed(Failure),
}

/// Result storage of a task frame.
///
/// Written once by the frame's completer before `READY` is published, read by
/// handles only after they observed `READY`.
pub(crate) struct Outcome<T> {
    slot: UnsafeCell<Slot<T>>,
    observed: Cell<bool>,
}

impl<T> Outcome<T> {
    pub(crate) const fn new() -> Self {
        Outcome {
            slot: UnsafeCell::new(Slot::Empty),
            observed: Cell::new(false),
        }
    }

    /// # Safety
    ///
    /// Only the completer may call this, before publishing `READY`.
    pub(crate) unsafe fn store(&self, output: Result<T, Failure>) {
        let slot = unsafe { &mut *self.slot.get() };
        debug_assert!(matches!(slot, Slot::Empty), "result stored twice");

        *slot = match output {
            Ok(value) => Slot::Value(value),
            Err(failure) => Slot::Failed(failure),
        };
    }

    /// # Safety
    ///
    /// The caller must have observed `READY` with acquire ordering.
    pub(crate) unsafe fn get(&self) -> Result<&T, Error> {
        match unsafe { &*self.slot.get() } {
            Slot::Value(value) => Ok(value),
            Slot::Failed(failure) => {
                self.observed.set(true);
                Err(Error::Failed(failure.clone()))
            }
            Slot::Empty => Err(Error::NotReady),
        }
    }

    /// Moves the value out, leaving the slot empty. Failures stay in place so
    /// every later reader sees the same instance.
    ///
    /// # Safety
    ///
    /// Same as [`Outcome::get`], and no reference from `get` may be alive.
    pub(crate) unsafe fn take(&self) -> Result<T, Error> {
        let slot = unsafe { &mut *self.slot.get() };

        match mem::replace(slot, Slot::Empty) {
            Slot::Value(value) => Ok(value),
            Slot::Failed(failure) => {
                self.observed.set(true);
                *slot = Slot::Failed(failure.clone());
                Err(Error::Failed(failure))
            }
            Slot::Empty => Err(Error::NotReady),
        }
    }
}

impl<T> Drop for Outcome<T> {
    fn drop(&mut self) {
        if let Slot::Failed(failure) = self.slot.get_mut() {
            if !self.observed.get() {
                debug!("Dropping task failure nobody observed: {}", failure);
            }
        }
    }
}
