use crate::error::Error;
use crate::reactor::uring::UringReactor;
use io_uring::squeue::Entry;
use pin_project::{pin_project, pinned_drop};
use std::fmt;
use std::future::Future;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// One kind of asynchronous request understood by [`UringReactor`].
///
/// # Safety
///
/// Any memory referenced by the entry returned from `setup_request` must
/// either live inside `self` and be consumed by the kernel at submission time
/// (like a timeout's `Timespec`), or stay valid until the completion arrives
/// even if the adapter is dropped early. The adapter never moves `self` once
/// `setup_request` was called.
pub unsafe trait Operation {
    type Output;

    /// Fills in the submission entry. `user_data` is overwritten by the reactor.
    fn setup_request(&mut self) -> Entry;

    /// Translates raw completion fields into this operation's result.
    fn on_resume(&mut self, res: i32, flags: u32) -> Result<Self::Output, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Submitted(usize),
    Completed,
}

/// Future bridging one [`Operation`] to its completion.
///
/// The request is submitted on first poll, and the task polling it is resumed
/// from [`Reactor::advance`] once the kernel posts the completion. Dropping a
/// submitted adapter abandons the request, its completion is discarded.
///
/// [`Reactor::advance`]: crate::Reactor::advance
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project(PinnedDrop)]
pub struct Adapter<O: Operation> {
    reactor: UringReactor,
    state: State,
    op: O,
    #[pin]
    _pin: PhantomPinned,
}

impl<O: Operation> Adapter<O> {
    pub(crate) fn new(reactor: UringReactor, op: O) -> Self {
        Adapter {
            reactor,
            state: State::Created,
            op,
            _pin: PhantomPinned,
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self.state, State::Submitted(_))
    }
}

impl<O: Operation> Future for Adapter<O> {
    type Output = Result<O::Output, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match *this.state {
            State::Created => {
                let entry = this.op.setup_request();

                // Safety: `op` is pinned from here on, see `Operation`.
                match unsafe { this.reactor.register(entry, cx.waker()) } {
                    Ok(key) => {
                        *this.state = State::Submitted(key);
                        Poll::Pending
                    }
                    Err(e) => {
                        *this.state = State::Completed;
                        Poll::Ready(Err(e))
                    }
                }
            }
            State::Submitted(key) => {
                let (res, flags) = ready!(this.reactor.poll_completion(key, cx.waker()));
                *this.state = State::Completed;
                Poll::Ready(this.op.on_resume(res, flags))
            }
            State::Completed => panic!("Adapter polled after completion"),
        }
    }
}

#[pinned_drop]
impl<O: Operation> PinnedDrop for Adapter<O> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();

        if let State::Submitted(key) = *this.state {
            this.reactor.release(key);
        }
    }
}

impl<O: Operation> fmt::Debug for Adapter<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
