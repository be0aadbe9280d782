use std::cell::UnsafeCell;
use std::marker::PhantomPinned;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;

/// An intrusive entry in a task's waiter chain.
///
/// The node lives inside the awaiting future, which is pinned for as long as
/// the node is linked. Its fields follow a hand-off protocol:
///
/// - `next` and `waker` are written by the owner before the node is published
///   with a release CAS, and read by the completer after its acquire swap.
/// - `consumed` is set by the completer once it no longer touches the node.
///   The owner must not free the node while it is linked and unconsumed.
pub(crate) struct Waiter {
    next: UnsafeCell<*mut Waiter>,
    waker: UnsafeCell<Option<Waker>>,
    consumed: AtomicBool,
    _pin: PhantomPinned,
}

// Sentinel markers are odd small addresses, which can never alias a node.
const _: () = assert!(std::mem::align_of::<Waiter>() > 2);

impl Waiter {
    pub(crate) const fn new() -> Self {
        Waiter {
            next: UnsafeCell::new(ptr::null_mut()),
            waker: UnsafeCell::new(None),
            consumed: AtomicBool::new(false),
            _pin: PhantomPinned,
        }
    }

    pub(crate) fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    /// # Safety
    ///
    /// The node must not be linked, or the caller must be the only thread
    /// that can run the completer of the chain it is linked in.
    pub(crate) unsafe fn set_waker(&self, waker: &Waker) {
        let slot = unsafe { &mut *self.waker.get() };

        match slot {
            Some(current) if current.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }

    /// # Safety
    ///
    /// Same as [`Waiter::set_waker`].
    pub(crate) unsafe fn clear_waker(&self) {
        unsafe { *self.waker.get() = None };
    }

    /// # Safety
    ///
    /// The node must be owned by the caller (not yet published), or the caller
    /// must have unlinked it under the single driving thread rule.
    pub(super) unsafe fn set_next(&self, next: *mut Waiter) {
        unsafe { *self.next.get() = next };
    }

    /// # Safety
    ///
    /// The node must be reachable from a chain the caller has acquired.
    pub(super) unsafe fn next(&self) -> *mut Waiter {
        unsafe { *self.next.get() }
    }
}

/// Walks a chain detached by the completer, taking each waker and releasing
/// each node as it goes.
///
/// A node is never touched again after it is marked consumed, so its owner may
/// free it as soon as it observes the flag.
pub(crate) struct Drain {
    cur: *mut Waiter,
}

impl Drain {
    /// # Safety
    ///
    /// `head` must be a chain obtained by an acquire swap that replaced it with
    /// a terminal marker, so no other thread can link or unlink nodes in it.
    pub(super) unsafe fn new(head: *mut Waiter) -> Self {
        Drain { cur: head }
    }
}

impl Iterator for Drain {
    type Item = Waker;

    fn next(&mut self) -> Option<Waker> {
        while !self.cur.is_null() {
            let node = self.cur;

            // Read everything we need before publishing `consumed`.
            let waker = unsafe {
                self.cur = *(*node).next.get();
                (*(*node).waker.get()).take()
            };
            unsafe { (*node).consumed.store(true, Ordering::Release) };

            if waker.is_some() {
                return waker;
            }
        }

        None
    }
}
