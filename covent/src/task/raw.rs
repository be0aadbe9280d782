#![allow(unsafe_op_in_unsafe_fn)]

use crate::task::Id;
use crate::task::header::{Flags, Header};
use crate::task::layout::{Frame, TaskLayout};
use crate::runtime::SPILL_TO_HEAP_THRESHOLD;
use log::trace;
use smallvec::SmallVec;
use std::future::Future;
use std::ptr::NonNull;
use std::task::Waker;

/// Untyped, non-owning pointer to a task frame.
///
/// Reference counting is explicit: owners call [`RawTask::ref_inc`] and
/// [`RawTask::drop_reference`] themselves.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawTask {
    ptr: NonNull<Header>,
}

impl RawTask {
    /// Allocates a frame holding one reference for the caller.
    pub(super) fn new<T, F>(future: F) -> RawTask
    where
        F: Future<Output = anyhow::Result<T>> + 'static,
        T: 'static,
    {
        let layout = Box::leak(TaskLayout::new(future));
        RawTask {
            ptr: NonNull::from(layout).cast::<Header>(),
        }
    }

    pub(super) unsafe fn from_raw(ptr: NonNull<Header>) -> RawTask {
        RawTask { ptr }
    }

    pub(super) fn header_ptr(&self) -> NonNull<Header> {
        self.ptr
    }

    pub(super) fn header(&self) -> &Header {
        // Safety: every RawTask in circulation is backed by a reference.
        unsafe { self.ptr.as_ref() }
    }

    /// # Safety
    ///
    /// `T` must be the output type the frame was allocated with.
    pub(super) unsafe fn frame<T>(&self) -> &Frame<T> {
        self.ptr.cast::<Frame<T>>().as_ref()
    }

    pub(super) fn id(&self) -> Id {
        self.header().id
    }

    pub(super) fn is_ready(&self) -> bool {
        self.header().readiness.is_ready()
    }

    /// Starts the body if nobody did yet, resuming it inline until its first
    /// suspension point. Returns true if this call started it.
    pub(super) fn start(self) -> bool {
        let header = self.header();

        if !header.readiness.try_start() {
            return false;
        }

        // Released by `complete` or `cancel`.
        header.ref_inc();
        header.set(Flags::SELF_REF);

        trace!("Starting task {}", header.id);
        self.resume();
        true
    }

    pub(super) fn resume(self) {
        unsafe { (self.header().vtable.poll)(self.ptr) }
    }

    pub(super) fn ref_inc(self) {
        self.header().ref_inc();
    }

    pub(super) fn drop_reference(self) {
        if self.header().ref_dec() {
            unsafe { (self.header().vtable.dealloc)(self.ptr) }
        }
    }

    fn release_self_ref(self) {
        let header = self.header();

        if header.has(Flags::SELF_REF) {
            header.clear(Flags::SELF_REF);
            self.drop_reference();
        }
    }

    /// Destroys a started body that has not completed. Awaiters of a cancelled
    /// frame are never resumed.
    pub(super) fn cancel(self) {
        let header = self.header();

        if header.readiness.is_started() && !header.readiness.is_ready() {
            trace!("Cancelling task {}", header.id);
            unsafe { (header.vtable.drop_future)(self.ptr) };
            self.release_self_ref();
        }
    }

    /// Sets the waker resumed after all waiters once the frame completes.
    ///
    /// # Safety
    ///
    /// Must be called by the owning thread before the frame is started.
    pub(super) unsafe fn set_continuation(self, waker: Waker) {
        *self.header().continuation.get() = Some(waker);
    }
}

/// Publishes completion of a frame whose result slot was just written.
///
/// All waiters are detached first and resumed afterwards, so none of them
/// observes a half-walked chain. The continuation goes last.
pub(super) unsafe fn complete(ptr: NonNull<Header>) {
    let raw = RawTask::from_raw(ptr);
    let header = raw.header();

    let waiters: SmallVec<[Waker; SPILL_TO_HEAP_THRESHOLD]> = header.readiness.complete().collect();
    let continuation = (*header.continuation.get()).take();

    trace!("Task {} completed, resuming {} waiter(s)", header.id, waiters.len());

    for waker in waiters {
        waker.wake();
    }

    if let Some(waker) = continuation {
        waker.wake();
    }

    raw.release_self_ref();
}
