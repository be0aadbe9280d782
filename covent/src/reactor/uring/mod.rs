//! Reactor backed by a Linux `io_uring` instance.

use crate::error::Error;
use crate::reactor::{Event, Reactor};
use crate::runtime::{Builder, ReactorConfig};
use io_uring::squeue::Entry;
use log::{trace, warn};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::task::{Poll, Waker};
use std::time::Duration;

mod adapter;
pub use adapter::{Adapter, Operation};

pub mod ops;
pub use ops::{Nop, Timeout};

mod ring;
use ring::{Completion, CompletionRing};

mod slab;
use slab::{Slot, SlotSlab};

/// Completion-queue reactor.
///
/// Requests are described by [`Operation`]s and awaited through an
/// [`Adapter`]. Each in-flight request occupies one slot, whose key travels
/// through the kernel as the entry's `user_data`.
///
/// The handle is cheap to clone, all clones drive the same ring.
#[derive(Clone)]
pub struct UringReactor {
    inner: Rc<Inner>,
}

struct Inner {
    cfg: ReactorConfig,
    ring: RefCell<CompletionRing>,
    slots: RefCell<SlotSlab>,

    /// Requests handed to the kernel whose completion was not harvested yet.
    in_flight: Cell<usize>,
}

impl UringReactor {
    /// Creates a reactor with the default configuration.
    pub fn new() -> Result<Self, Error> {
        Self::with_config(ReactorConfig::default())
    }

    /// Creates a reactor from `cfg`, checked against the kernel limits first.
    pub fn with_config(cfg: ReactorConfig) -> Result<Self, Error> {
        cfg.validate()?;

        let ring = CompletionRing::try_new(&cfg)?;

        // Every completion ring entry may correspond to an in-flight request.
        let slots = SlotSlab::new(cfg.cq_entries() as usize);

        Ok(UringReactor {
            inner: Rc::new(Inner {
                cfg,
                ring: RefCell::new(ring),
                slots: RefCell::new(slots),
                in_flight: Cell::new(0),
            }),
        })
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.inner.cfg
    }

    /// Wraps `op` in an adapter bound to this reactor. Nothing is submitted
    /// until the adapter is first polled.
    pub fn submit<O: Operation>(&self, op: O) -> Adapter<O> {
        Adapter::new(self.clone(), op)
    }

    /// Queues `entry` and records `waker` to resume on its completion.
    ///
    /// # Safety
    ///
    /// See [`Operation`].
    pub(crate) unsafe fn register(&self, entry: Entry, waker: &Waker) -> Result<usize, Error> {
        let mut slots = self.inner.slots.borrow_mut();
        let reserved = slots.reserve_entry()?;
        let key = reserved.key();

        let entry = entry.user_data(key as u64);
        unsafe { self.inner.ring.borrow_mut().push(&entry)? };

        reserved.commit(Slot::Submitted(waker.clone()));
        self.inner.in_flight.set(self.inner.in_flight.get() + 1);

        trace!("Queued request {}", key);
        Ok(key)
    }

    /// Takes the completion of `key` if it arrived, otherwise remembers the
    /// latest waker.
    pub(crate) fn poll_completion(&self, key: usize, waker: &Waker) -> Poll<(i32, u32)> {
        let mut slots = self.inner.slots.borrow_mut();

        match slots.get_mut(key) {
            Some(Slot::Completed { res, flags }) => {
                let out = (*res, *flags);
                slots.remove(key);
                Poll::Ready(out)
            }
            Some(Slot::Submitted(current)) => {
                if !current.will_wake(waker) {
                    *current = waker.clone();
                }
                Poll::Pending
            }
            other => panic!("request {} polled in invalid state: {:?}", key, other),
        }
    }

    /// Abandons `key`. A completion that already arrived is discarded now, a
    /// later one is discarded on arrival.
    pub(crate) fn release(&self, key: usize) {
        {
            let mut slots = self.inner.slots.borrow_mut();

            match slots.get_mut(key) {
                Some(Slot::Completed { .. }) => {
                    slots.remove(key);
                    return;
                }
                Some(slot) => *slot = Slot::Orphaned,
                None => return,
            }
        }

        // The entry may still sit in the submission ring, make sure the kernel
        // consumed it before the adapter memory goes away.
        let mut ring = self.inner.ring.borrow_mut();
        if ring.num_unsubmitted() > 0 {
            if let Err(e) = ring.submit() {
                warn!("Failed to flush abandoned request {}: {}", key, e);
            }
        }
    }

    /// Stores one completion and resumes its waiter. Borrows are released
    /// before waking since the resumed task may submit new requests.
    fn dispatch(&self, completion: Completion) {
        let Completion { key, res, flags } = completion;

        let waker = {
            let mut slots = self.inner.slots.borrow_mut();

            let Some(slot) = slots.get_mut(key) else {
                warn!("Completion for unknown request {}", key);
                return;
            };

            self.inner.in_flight.set(self.inner.in_flight.get() - 1);

            match mem::replace(slot, Slot::Completed { res, flags }) {
                Slot::Submitted(waker) => Some(waker),
                Slot::Orphaned => {
                    slots.remove(key);
                    None
                }
                Slot::Completed { .. } => {
                    warn!("Duplicate completion for request {}", key);
                    None
                }
            }
        };

        trace!("Request {} completed with {}", key, res);

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn dispatch_all(&self) -> usize {
        let completions = self.inner.ring.borrow_mut().drain();
        let n = completions.len();

        for completion in completions {
            self.dispatch(completion);
        }

        n
    }
}

impl Reactor for UringReactor {
    fn advance(&self) -> Result<usize, Error> {
        // 1. Submit everything queued since the last cycle.
        self.inner.ring.borrow_mut().submit()?;

        // 2. Dispatch what is already there without blocking.
        let mut dispatched = self.dispatch_all();

        // 3. One blocking wait for further progress. Skipped when nothing is
        //    outstanding, it would never return.
        if self.pending() > 0 {
            self.inner.ring.borrow_mut().submit_and_wait(1)?;
            dispatched += self.dispatch_all();
        }

        Ok(dispatched)
    }

    fn schedule_delay(&self, duration: Duration) -> Event {
        Event::new(self.submit(Timeout::new(duration)))
    }

    fn pending(&self) -> usize {
        self.inner.in_flight.get()
    }
}

impl fmt::Debug for UringReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UringReactor")
            .field("cfg", &self.inner.cfg)
            .field("in_flight", &self.inner.in_flight.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use anyhow::Result;
    use std::pin::pin;
    use std::task::Context;
    use std::time::Instant;

    #[test]
    fn test_nop_round_trip() -> Result<()> {
        let Some(reactor) = uring_or_skip() else {
            return Ok(());
        };

        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);
        let mut op = pin!(reactor.submit(Nop));

        assert!(op.as_mut().poll(&mut cx).is_pending());
        assert!(op.is_submitted());
        assert_eq!(reactor.pending(), 1);

        assert_eq!(reactor.advance()?, 1);
        assert_eq!(data.get_count(), 1);
        assert_eq!(reactor.pending(), 0);

        assert!(matches!(op.as_mut().poll(&mut cx), Poll::Ready(Ok(0))));
        Ok(())
    }

    #[test]
    fn test_advance_without_outstanding_work_returns() -> Result<()> {
        let Some(reactor) = uring_or_skip() else {
            return Ok(());
        };

        assert_eq!(reactor.advance()?, 0);
        Ok(())
    }

    #[test]
    fn test_timeout_waits() -> Result<()> {
        let Some(reactor) = uring_or_skip() else {
            return Ok(());
        };

        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);
        let mut delay = pin!(reactor.schedule_delay(Duration::from_millis(20)));

        let start = Instant::now();
        assert!(delay.as_mut().poll(&mut cx).is_pending());

        while data.get_count() == 0 {
            reactor.advance()?;
        }

        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(matches!(delay.as_mut().poll(&mut cx), Poll::Ready(Ok(()))));
        Ok(())
    }

    #[test]
    fn test_dropped_adapter_is_orphaned() -> Result<()> {
        let Some(reactor) = uring_or_skip() else {
            return Ok(());
        };

        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);

        {
            let mut delay = Box::pin(reactor.submit(Timeout::new(Duration::from_millis(5))));
            assert!(delay.as_mut().poll(&mut cx).is_pending());
        }

        // Still outstanding in the kernel, but nobody is resumed.
        assert_eq!(reactor.pending(), 1);
        while reactor.pending() > 0 {
            reactor.advance()?;
        }

        assert_eq!(data.get_count(), 0);
        assert_eq!(reactor.inner.slots.borrow().len(), 0);
        Ok(())
    }

    #[test]
    fn test_slot_exhaustion() -> Result<()> {
        let cfg = ReactorConfig::try_from(Builder::new().entries(2).cq_size_multiplier(1))?;
        let reactor = match UringReactor::with_config(cfg) {
            Ok(reactor) => reactor,
            Err(e) => {
                eprintln!("io_uring unavailable, skipping: {}", e);
                return Ok(());
            }
        };

        let (waker, _) = mock_waker();
        let mut cx = Context::from_waker(&waker);

        let mut a = Box::pin(reactor.submit(Timeout::new(Duration::from_secs(5))));
        let mut b = Box::pin(reactor.submit(Timeout::new(Duration::from_secs(5))));
        let mut c = Box::pin(reactor.submit(Nop));

        assert!(a.as_mut().poll(&mut cx).is_pending());
        assert!(b.as_mut().poll(&mut cx).is_pending());
        assert!(matches!(
            c.as_mut().poll(&mut cx),
            Poll::Ready(Err(Error::SubmissionQueueFull))
        ));
        Ok(())
    }
}
