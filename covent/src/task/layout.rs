#![allow(unsafe_op_in_unsafe_fn)]

use crate::context;
use crate::error::Failure;
use crate::task::header::{Flags, Header, Vtable};
use crate::task::outcome::Outcome;
use crate::task::raw;
use crate::task::waker::waker_ref;
use std::cell::UnsafeCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::ptr::NonNull;
use std::task::{Context, Poll};

/// The typed part of a frame, visible to handles that know `T`.
///
/// `Header` must stay the first field: handles cast `*mut Header` back to
/// `*mut Frame<T>`.
#[repr(C)]
pub(crate) struct Frame<T> {
    pub(crate) header: Header,
    pub(crate) outcome: Outcome<T>,
}

/// The full allocation. `Frame<T>` must stay the first field: the vtable casts
/// `*mut Header` back to `*mut TaskLayout<T, F>`.
#[repr(C)]
pub(super) struct TaskLayout<T, F> {
    pub(super) frame: Frame<T>,

    /// The body, dropped as soon as it produces its output.
    pub(super) future: UnsafeCell<Option<F>>,
}

impl<T, F> TaskLayout<T, F>
where
    F: Future<Output = anyhow::Result<T>>,
{
    pub(super) fn new(future: F) -> Box<TaskLayout<T, F>> {
        Box::new(TaskLayout {
            frame: Frame {
                header: Header::new(vtable::<T, F>()),
                outcome: Outcome::new(),
            },
            future: UnsafeCell::new(Some(future)),
        })
    }
}

fn vtable<T, F>() -> &'static Vtable
where
    F: Future<Output = anyhow::Result<T>>,
{
    &Vtable {
        poll: poll::<T, F>,
        drop_future: drop_future::<T, F>,
        dealloc: dealloc::<T, F>,
    }
}

unsafe fn poll<T, F>(ptr: NonNull<Header>)
where
    F: Future<Output = anyhow::Result<T>>,
{
    let layout = ptr.cast::<TaskLayout<T, F>>().as_ref();
    let header = &layout.frame.header;

    header.assert_owner();

    // Stale wake after completion or cancellation.
    if header.readiness.is_ready() || (*layout.future.get()).is_none() {
        return;
    }

    // Woken from inside its own poll, e.g. a child completed synchronously.
    if header.has(Flags::POLLING) {
        header.set(Flags::NOTIFIED);
        return;
    }

    header.set(Flags::POLLING);

    let output = {
        let _enter = context::enter_task(ptr);
        let waker = waker_ref(&ptr);
        let mut cx = Context::from_waker(&waker);

        loop {
            header.clear(Flags::NOTIFIED);

            let Some(future) = (*layout.future.get()).as_mut() else {
                header.clear(Flags::POLLING);
                return;
            };
            let future = Pin::new_unchecked(future);

            match panic::catch_unwind(AssertUnwindSafe(|| future.poll(&mut cx))) {
                Ok(Poll::Pending) if header.has(Flags::NOTIFIED) => continue,
                Ok(Poll::Pending) => {
                    header.clear(Flags::POLLING);
                    return;
                }
                Ok(Poll::Ready(output)) => break output.map_err(Failure::capture),
                Err(payload) => break Err(Failure::from_panic(payload)),
            }
        }
    };

    // Locals of the body go away before any waiter observes the result.
    let output = match panic::catch_unwind(AssertUnwindSafe(|| {
        *layout.future.get() = None;
    })) {
        Ok(()) => output,
        Err(payload) => output.and(Err(Failure::from_panic(payload))),
    };

    layout.frame.outcome.store(output);
    header.clear(Flags::POLLING);

    raw::complete(ptr);
}

unsafe fn drop_future<T, F>(ptr: NonNull<Header>)
where
    F: Future<Output = anyhow::Result<T>>,
{
    let layout = ptr.cast::<TaskLayout<T, F>>().as_ref();
    debug_assert!(!layout.frame.header.has(Flags::POLLING));

    let _enter = context::enter_task(ptr);
    *layout.future.get() = None;
}

unsafe fn dealloc<T, F>(ptr: NonNull<Header>)
where
    F: Future<Output = anyhow::Result<T>>,
{
    drop(Box::from_raw(ptr.cast::<TaskLayout<T, F>>().as_ptr()));
}
