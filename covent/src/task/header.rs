use crate::context;
use crate::reactor::Reactor;
use crate::task::Id;
use crate::task::remote::Inbox;
use crate::task::state::Readiness;
use bitflags::bitflags;
use std::cell::{Cell, UnsafeCell};
use std::ptr::NonNull;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Waker;
use std::thread::{self, ThreadId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Flags: u8 {
        /// The body is being polled further up the stack.
        const POLLING = 1 << 0;

        /// A wake arrived while polling, poll again before yielding.
        const NOTIFIED = 1 << 1;

        /// The frame holds a reference to itself, from start to completion.
        const SELF_REF = 1 << 2;
    }
}

/// Table of monomorphized functions for a concrete frame layout.
pub(crate) struct Vtable {
    /// Resumes the body, and completes the frame if it finishes.
    pub(super) poll: unsafe fn(NonNull<Header>),

    /// Destroys the body without producing a result.
    pub(super) drop_future: unsafe fn(NonNull<Header>),

    /// Frees the whole allocation.
    pub(super) dealloc: unsafe fn(NonNull<Header>),
}

/// Type-erased part of a task frame. Handles and wakers only ever point here.
///
/// Everything except `readiness`, `refs` and `inbox` is only touched by the
/// thread that owns the frame. Wakers used elsewhere go through `inbox`.
#[repr(C)]
pub(crate) struct Header {
    pub(super) readiness: Readiness,

    /// Handles, wakers and the frame's own self reference.
    pub(super) refs: AtomicUsize,

    /// Number of live `Task` handles, a subset of `refs`.
    pub(super) handles: Cell<usize>,

    pub(super) flags: Cell<Flags>,

    pub(super) vtable: &'static Vtable,

    pub(super) id: Id,

    pub(super) owner: ThreadId,

    /// Where foreign threads queue wakes and the final release.
    pub(super) inbox: Arc<Inbox>,

    /// Reactor active when the frame was created, if any.
    pub(super) reactor: Option<Weak<dyn Reactor>>,

    /// Resumed after every waiter, used by root tasks only.
    pub(super) continuation: UnsafeCell<Option<Waker>>,
}

impl Header {
    pub(super) fn new(vtable: &'static Vtable) -> Header {
        Header {
            readiness: Readiness::new(),
            refs: AtomicUsize::new(1),
            handles: Cell::new(1),
            flags: Cell::new(Flags::empty()),
            vtable,
            id: Id::next(),
            owner: thread::current().id(),
            inbox: Inbox::current(),
            reactor: context::active_reactor().map(|r| Rc::downgrade(&r)),
            continuation: UnsafeCell::new(None),
        }
    }

    pub(super) fn has(&self, flag: Flags) -> bool {
        self.flags.get().contains(flag)
    }

    pub(super) fn set(&self, flag: Flags) {
        self.flags.set(self.flags.get() | flag);
    }

    pub(super) fn clear(&self, flag: Flags) {
        self.flags.set(self.flags.get() - flag);
    }

    pub(super) fn ref_inc(&self) {
        let prev = self.refs.fetch_add(1, Ordering::Relaxed);

        // Same guard as `Arc`, a wrapped counter would free a live frame.
        if prev > isize::MAX as usize {
            std::process::abort();
        }
    }

    /// Returns true if this was the last reference.
    pub(super) fn ref_dec(&self) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "task refcount underflow");
        prev == 1
    }

    pub(super) fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(super) fn is_owned_here(&self) -> bool {
        self.owner == thread::current().id()
    }

    #[track_caller]
    pub(super) fn assert_owner(&self) {
        assert_eq!(
            self.owner,
            thread::current().id(),
            "task {} resumed from a thread other than the one driving it",
            self.id
        );
    }

    /// Upgrades the reactor captured at creation.
    pub(crate) fn reactor(&self) -> Option<Rc<dyn Reactor>> {
        self.reactor.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }
}
