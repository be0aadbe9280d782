#![allow(unsafe_op_in_unsafe_fn)]

use crate::task::Header;
use crate::task::raw::RawTask;
use crossbeam_deque::{Injector, Steal};
use log::trace;
use std::ptr::NonNull;
use std::sync::Arc;

thread_local! {
    static INBOX: Arc<Inbox> = Arc::new(Inbox::default());
}

/// Work a foreign thread handed back to the thread owning a frame.
enum Deferred {
    /// Resume the frame, then drop the reference the wake carried.
    Wake(FramePtr),

    /// The last reference was dropped remotely, free the frame.
    Release(FramePtr),
}

/// A frame pointer on its way back to the owner. The sender only ever touched
/// the atomic refcount through it.
struct FramePtr(NonNull<Header>);

// Safety: the pointer is only dereferenced beyond the refcount on the owner
// thread, when the inbox is drained.
unsafe impl Send for FramePtr {}

/// Per-thread queue of wakes and releases coming from other threads.
///
/// Every frame keeps the inbox of the thread that created it. Wakers used off
/// that thread never resume or free the frame themselves, they push here and
/// the owner replays the work in [`run_deferred`].
#[derive(Default)]
pub(crate) struct Inbox {
    queue: Injector<Deferred>,
}

impl Inbox {
    /// Inbox of the calling thread.
    pub(crate) fn current() -> Arc<Inbox> {
        INBOX.with(Arc::clone)
    }

    /// Hands a wake to the owner. The caller transfers one frame reference.
    pub(super) fn push_wake(&self, header: NonNull<Header>) {
        self.queue.push(Deferred::Wake(FramePtr(header)));
    }

    /// Hands the release of an unreferenced frame to the owner.
    pub(super) fn push_release(&self, header: NonNull<Header>) {
        self.queue.push(Deferred::Release(FramePtr(header)));
    }
}

/// Replays the wakes and releases other threads queued for frames owned by
/// the calling thread. Returns how many were processed.
pub(crate) fn run_deferred() -> usize {
    let inbox = Inbox::current();
    let mut n = 0;

    loop {
        match inbox.queue.steal() {
            Steal::Success(deferred) => {
                unsafe { deferred.run() };
                n += 1;
            }
            Steal::Retry => continue,
            Steal::Empty => break,
        }
    }

    if n > 0 {
        trace!("Replayed {} deferred wake(s) or release(s)", n);
    }

    n
}

/// True if other threads queued work for frames owned by the calling thread.
pub(crate) fn has_deferred() -> bool {
    INBOX.with(|inbox| !inbox.queue.is_empty())
}

impl Deferred {
    /// # Safety
    ///
    /// Must run on the thread owning the frame.
    unsafe fn run(self) {
        match self {
            Deferred::Wake(FramePtr(ptr)) => {
                let raw = RawTask::from_raw(ptr);
                raw.resume();
                raw.drop_reference();
            }
            Deferred::Release(FramePtr(ptr)) => {
                debug_assert_eq!(ptr.as_ref().ref_count(), 0);
                (ptr.as_ref().vtable.dealloc)(ptr);
            }
        }
    }
}
