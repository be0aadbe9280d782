use crate::reactor::UringReactor;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

// Exports
pub(crate) mod mocks;
pub(crate) use mocks::{MockReactor, mock_waker};

pub(crate) fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// Ring creation is refused in some sandboxes, tests needing the kernel bail
/// out early there.
pub(crate) fn uring_or_skip() -> Option<UringReactor> {
    init_logging();

    match UringReactor::new() {
        Ok(reactor) => Some(reactor),
        Err(e) => {
            eprintln!("io_uring unavailable, skipping: {}", e);
            None
        }
    }
}

/// Sets the shared flag when dropped, to observe when a task body goes away.
pub(crate) struct DropFlag(pub(crate) Rc<Cell<bool>>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

#[derive(Default)]
struct GateState {
    open: Cell<bool>,
    wakers: RefCell<Vec<Waker>>,
}

/// Manually opened barrier. Every `wait()` stays pending until `open()`.
#[derive(Clone, Default)]
pub(crate) struct Gate(Rc<GateState>);

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn wait(&self) -> GateWait {
        GateWait(self.clone())
    }

    /// Opens the gate and wakes everyone parked on it. Wakers run after the
    /// list borrow is released.
    pub(crate) fn open(&self) {
        self.0.open.set(true);

        let wakers = std::mem::take(&mut *self.0.wakers.borrow_mut());
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Number of registered wakers.
    pub(crate) fn waiters(&self) -> usize {
        self.0.wakers.borrow().len()
    }
}

pub(crate) struct GateWait(Gate);

impl Future for GateWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let state = &(self.0).0;

        if state.open.get() {
            return Poll::Ready(());
        }

        let mut wakers = state.wakers.borrow_mut();
        if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }

        Poll::Pending
    }
}
