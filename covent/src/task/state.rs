use crate::task::waiter::{Drain, Waiter};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// The frame has been allocated but its body has never been resumed.
const NOT_STARTED: *mut Waiter = ptr::without_provenance_mut(1);

/// The body finished and the result slot is published. Terminal.
const READY: *mut Waiter = ptr::without_provenance_mut(2);

/// Readiness marker of a task frame.
///
/// A single atomic word encodes the whole lifecycle:
///
/// - `NOT_STARTED`: the body was never resumed.
/// - null: the body is running and nobody awaits it yet.
/// - a node pointer: the body is running, the word is the head of a LIFO chain
///   of suspended awaiters.
/// - `READY`: the result is published. Once observed with acquire ordering,
///   the result slot is safe to read.
pub(crate) struct Readiness {
    head: AtomicPtr<Waiter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    /// The node is linked and will be consumed by the completer.
    Enqueued,
    /// The frame became ready before the node could be linked.
    Ready,
}

impl Readiness {
    pub(crate) const fn new() -> Self {
        Readiness {
            head: AtomicPtr::new(NOT_STARTED),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.head.load(Ordering::Acquire) == READY
    }

    pub(crate) fn is_started(&self) -> bool {
        self.head.load(Ordering::Acquire) != NOT_STARTED
    }

    /// Transitions `NOT_STARTED` to running. Exactly one caller wins and
    /// becomes responsible for resuming the body.
    pub(crate) fn try_start(&self) -> bool {
        self.head
            .compare_exchange(
                NOT_STARTED,
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Links `node` at the head of the chain, unless the frame is ready.
    ///
    /// # Safety
    ///
    /// `node` must be pinned and unlinked, and must stay valid until it is
    /// either observed consumed or removed with [`Readiness::remove`].
    pub(crate) unsafe fn push(&self, node: NonNull<Waiter>) -> Push {
        let mut head = self.head.load(Ordering::Acquire);

        loop {
            if head == READY {
                return Push::Ready;
            }

            debug_assert_ne!(head, NOT_STARTED, "frame must be started before it is awaited");

            unsafe { node.as_ref().set_next(head) };

            match self.head.compare_exchange_weak(
                head,
                node.as_ptr(),
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return Push::Enqueued,
                Err(actual) => head = actual,
            }
        }
    }

    /// Unlinks a node whose owner stops waiting before the frame completes.
    ///
    /// Returns false if the completer already detached the chain, in which case
    /// the owner must wait for the node to be consumed before freeing it.
    ///
    /// # Safety
    ///
    /// `node` must have been enqueued on this marker. Unlinking from the middle
    /// of the chain is a plain store, so every awaiter of this frame must be
    /// driven by the calling thread.
    pub(crate) unsafe fn remove(&self, node: NonNull<Waiter>) -> bool {
        let target = node.as_ptr();

        loop {
            let head = self.head.load(Ordering::Acquire);

            if head == READY {
                return false;
            }

            let next = unsafe { node.as_ref().next() };

            if head == target {
                match self.head.compare_exchange(
                    head,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return true,
                    Err(_) => continue,
                }
            }

            let mut prev = head;
            while !prev.is_null() && prev != NOT_STARTED {
                let after = unsafe { (*prev).next() };
                if after == target {
                    unsafe { (*prev).set_next(next) };
                    return true;
                }
                prev = after;
            }

            return false;
        }
    }

    /// Publishes `READY` and detaches the chain of waiters.
    ///
    /// # Safety
    ///
    /// Must be called exactly once, by the frame's completer, after the result
    /// slot was written.
    pub(crate) unsafe fn complete(&self) -> Drain {
        let head = self.head.swap(READY, Ordering::AcqRel);
        debug_assert!(head != READY && head != NOT_STARTED, "invalid completion");

        unsafe { Drain::new(head) }
    }
}

impl std::fmt::Debug for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = self.head.load(Ordering::Acquire);
        let state = if head == NOT_STARTED {
            "NotStarted"
        } else if head == READY {
            "Ready"
        } else if head.is_null() {
            "Running"
        } else {
            "Awaited"
        };
        f.debug_tuple("Readiness").field(&state).finish()
    }
}
