//! Reactors turn kernel or timer completions into task resumptions.

use crate::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

pub mod timer;
pub use timer::TimerReactor;

pub mod uring;
pub use uring::UringReactor;

/// A completion-driven event source.
///
/// A reactor is driven by a single thread, see [`Runner`]. Resumptions happen
/// from inside [`Reactor::advance`], on that thread.
///
/// [`Runner`]: crate::Runner
pub trait Reactor {
    /// Performs one submit / harvest / wait cycle and resumes the tasks whose
    /// operations completed. Returns the number of completions dispatched.
    ///
    /// Each call waits for at least one completion. Callers must only advance
    /// while [`Reactor::pending`] is non-zero, since nothing could end the
    /// wait otherwise. [`Runner`] reports that case as [`Error::Stalled`]
    /// without calling `advance`.
    ///
    /// [`Runner`]: crate::Runner
    fn advance(&self) -> Result<usize, Error>;

    /// Returns an event completing once `duration` has elapsed. The delay
    /// starts no later than the event's first poll.
    fn schedule_delay(&self, duration: Duration) -> Event;

    /// Number of operations submitted and not completed yet.
    ///
    /// An operation completed by another thread stays pending until its wake
    /// has been handed to the waker, so the runner never declares a stall
    /// while a wake is still in flight.
    fn pending(&self) -> usize;
}

/// A type-erased, awaitable reactor operation.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Event {
    inner: Pin<Box<dyn Future<Output = Result<(), Error>>>>,
}

impl Event {
    pub fn new<F>(future: F) -> Event
    where
        F: Future<Output = Result<(), Error>> + 'static,
    {
        Event {
            inner: Box::pin(future),
        }
    }

    /// An event that fails on first poll.
    pub fn failed(err: Error) -> Event {
        Event::new(std::future::ready(Err(err)))
    }
}

impl Future for Event {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").finish_non_exhaustive()
    }
}
