use crate::error::Error;
use crate::task::Task;
use crate::task::raw::RawTask;
use crate::task::state::Push;
use crate::task::waiter::Waiter;
use pin_project::pin_project;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::ptr::NonNull;
use std::task::{Context, Poll, ready};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Waiting,
    Done,
}

/// Await protocol shared by every future that waits on a frame.
///
/// The first poll starts the frame if needed, then links an intrusive node in
/// the frame's waiter chain unless the result is already published. The
/// owning future must keep a handle alive for as long as the slot exists, and
/// must drop the slot before that handle.
pub(super) struct WaitSlot {
    raw: Option<RawTask>,
    stage: Stage,
    node: Waiter,
}

impl WaitSlot {
    pub(super) fn new(raw: Option<RawTask>) -> WaitSlot {
        WaitSlot {
            raw,
            stage: Stage::Idle,
            node: Waiter::new(),
        }
    }

    /// Resolves once the frame is ready and the slot no longer sits in its
    /// chain. A null frame is ready right away.
    pub(super) fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // Safety: `node` is never moved out, the slot stays pinned while linked.
        let this = unsafe { self.get_unchecked_mut() };

        let Some(raw) = this.raw else {
            return Poll::Ready(());
        };
        let readiness = &raw.header().readiness;

        match this.stage {
            Stage::Done => Poll::Ready(()),
            Stage::Idle => {
                if readiness.is_ready() {
                    this.stage = Stage::Done;
                    return Poll::Ready(());
                }

                // Lazy start, the body runs inline up to its first suspension.
                raw.start();

                unsafe { this.node.set_waker(cx.waker()) };

                match unsafe { readiness.push(NonNull::from(&this.node)) } {
                    Push::Ready => {
                        unsafe { this.node.clear_waker() };
                        this.stage = Stage::Done;
                        Poll::Ready(())
                    }
                    Push::Enqueued => {
                        this.stage = Stage::Waiting;
                        Poll::Pending
                    }
                }
            }
            Stage::Waiting => {
                if this.node.is_consumed() {
                    this.stage = Stage::Done;
                    return Poll::Ready(());
                }

                // Spurious poll, e.g. from a select. The completer can only run
                // on this thread, so refreshing the waker cannot race with it.
                unsafe { this.node.set_waker(cx.waker()) };
                Poll::Pending
            }
        }
    }
}

impl Drop for WaitSlot {
    fn drop(&mut self) {
        let (Stage::Waiting, Some(raw)) = (self.stage, self.raw) else {
            return;
        };

        if self.node.is_consumed() {
            return;
        }

        let node = NonNull::from(&self.node);
        if unsafe { !raw.header().readiness.remove(node) } {
            // The completer detached the chain and still walks it.
            while !self.node.is_consumed() {
                std::hint::spin_loop();
            }
        }
    }
}

/// Future returned by awaiting `&Task<T>`, resolving to a reference into the
/// shared result.
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct Join<'a, T> {
    // Dropped before `task`.
    #[pin]
    slot: WaitSlot,
    task: &'a Task<T>,
}

impl<'a, T> Join<'a, T> {
    pub(super) fn new(task: &'a Task<T>) -> Self {
        Join {
            slot: WaitSlot::new(task.raw()),
            task,
        }
    }
}

impl<'a, T> Future for Join<'a, T> {
    type Output = Result<&'a T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let task: &'a Task<T> = *this.task;

        if task.is_null() {
            return Poll::Ready(Err(Error::BrokenPromise));
        }

        ready!(this.slot.poll_ready(cx));
        Poll::Ready(task.result())
    }
}

impl<T> fmt::Debug for Join<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Join")
            .field("task", &self.task)
            .field("stage", &self.slot.stage)
            .finish()
    }
}

/// Future returned by awaiting an owned `Task<T>`, resolving to a clone of the
/// shared result.
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct JoinOwned<T> {
    // Dropped before `task`.
    #[pin]
    slot: WaitSlot,
    task: Task<T>,
}

impl<T> JoinOwned<T> {
    pub(super) fn new(task: Task<T>) -> Self {
        JoinOwned {
            slot: WaitSlot::new(task.raw()),
            task,
        }
    }
}

impl<T: Clone> Future for JoinOwned<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.task.is_null() {
            return Poll::Ready(Err(Error::BrokenPromise));
        }

        ready!(this.slot.poll_ready(cx));
        Poll::Ready(this.task.result().cloned())
    }
}

/// Synchronization-only await, see [`Task::when_ready`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct WhenReady<'a, T> {
    // Dropped before `_task`.
    #[pin]
    slot: WaitSlot,
    _task: &'a Task<T>,
}

impl<'a, T> WhenReady<'a, T> {
    pub(super) fn new(task: &'a Task<T>) -> Self {
        WhenReady {
            slot: WaitSlot::new(task.raw()),
            _task: task,
        }
    }
}

impl<T> Future for WhenReady<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.project().slot.poll_ready(cx)
    }
}
