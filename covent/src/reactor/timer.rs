//! Portable reactor that only knows about delays.
//!
//! Useful where `io_uring` is not available and for deterministic tests: the
//! driving thread sleeps until the earliest deadline instead of waiting on the
//! kernel.

use crate::error::Error;
use crate::reactor::{Event, Reactor};
use log::trace;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

type Key = (Instant, u64);

/// Delay-only [`Reactor`].
#[derive(Clone, Default)]
pub struct TimerReactor {
    inner: Rc<Timers>,
}

#[derive(Default)]
struct Timers {
    /// Armed timers ordered by deadline, ties broken by registration order.
    queue: RefCell<BTreeMap<Key, Option<Waker>>>,

    /// Timers that expired but whose delay was not polled since.
    fired: RefCell<HashSet<u64>>,

    next_id: Cell<u64>,
}

impl TimerReactor {
    pub fn new() -> Self {
        Self::default()
    }

    fn arm(&self, deadline: Instant) -> Key {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);

        let key = (deadline, id);
        self.inner.queue.borrow_mut().insert(key, None);
        key
    }

    /// Wakes every timer whose deadline passed. Wakers run after the queue
    /// borrow is released.
    fn fire_expired(&self, now: Instant) -> usize {
        let expired = {
            let mut queue = self.inner.queue.borrow_mut();
            let mut fired = self.inner.fired.borrow_mut();

            // Everything strictly after `now` stays armed.
            let later = queue.split_off(&(now, u64::MAX));
            let expired = std::mem::replace(&mut *queue, later);

            fired.extend(expired.keys().map(|(_, id)| *id));
            expired
        };

        let n = expired.len();
        expired.into_values().flatten().for_each(Waker::wake);
        n
    }
}

impl Reactor for TimerReactor {
    fn advance(&self) -> Result<usize, Error> {
        let Some(deadline) = self.inner.queue.borrow().keys().next().map(|(d, _)| *d) else {
            return Ok(0);
        };

        let now = Instant::now();
        if deadline > now {
            trace!("Sleeping {:?} until the next timer", deadline - now);
            thread::sleep(deadline - now);
        }

        Ok(self.fire_expired(Instant::now()))
    }

    fn schedule_delay(&self, duration: Duration) -> Event {
        let key = self.arm(Instant::now() + duration);

        Event::new(Delay {
            timers: self.clone(),
            key,
            done: false,
        })
    }

    fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }
}

impl fmt::Debug for TimerReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerReactor")
            .field("pending", &self.pending())
            .finish()
    }
}

struct Delay {
    timers: TimerReactor,
    key: Key,
    done: bool,
}

impl Future for Delay {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let (_, id) = self.key;

        if self.timers.inner.fired.borrow_mut().remove(&id) {
            self.done = true;
            return Poll::Ready(Ok(()));
        }

        let mut queue = self.timers.inner.queue.borrow_mut();
        let Some(slot) = queue.get_mut(&self.key) else {
            panic!("Delay polled after completion");
        };

        if !slot.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
            *slot = Some(cx.waker().clone());
        }

        Poll::Pending
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        let (_, id) = self.key;
        self.timers.inner.queue.borrow_mut().remove(&self.key);
        self.timers.inner.fired.borrow_mut().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use anyhow::Result;
    use std::pin::pin;

    #[test]
    fn test_advance_without_timers_returns() -> Result<()> {
        let reactor = TimerReactor::new();
        assert_eq!(reactor.advance()?, 0);
        Ok(())
    }

    #[test]
    fn test_timers_fire_in_deadline_order() -> Result<()> {
        let reactor = TimerReactor::new();
        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);

        let mut slow = pin!(reactor.schedule_delay(Duration::from_millis(30)));
        let mut fast = pin!(reactor.schedule_delay(Duration::from_millis(10)));
        assert_eq!(reactor.pending(), 2);

        assert!(slow.as_mut().poll(&mut cx).is_pending());
        assert!(fast.as_mut().poll(&mut cx).is_pending());

        let start = Instant::now();
        assert_eq!(reactor.advance()?, 1);
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(data.get_count(), 1);

        assert!(matches!(fast.as_mut().poll(&mut cx), Poll::Ready(Ok(()))));
        assert!(slow.as_mut().poll(&mut cx).is_pending());

        assert_eq!(reactor.advance()?, 1);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(matches!(slow.as_mut().poll(&mut cx), Poll::Ready(Ok(()))));
        assert_eq!(reactor.pending(), 0);
        Ok(())
    }

    #[test]
    fn test_expired_before_first_poll() -> Result<()> {
        let reactor = TimerReactor::new();
        let mut delay = pin!(reactor.schedule_delay(Duration::ZERO));

        assert_eq!(reactor.advance()?, 1);

        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(matches!(delay.as_mut().poll(&mut cx), Poll::Ready(Ok(()))));
        assert_eq!(data.get_count(), 0);
        Ok(())
    }

    #[test]
    fn test_dropped_delay_disarms() {
        let reactor = TimerReactor::new();

        let delay = reactor.schedule_delay(Duration::from_secs(60));
        assert_eq!(reactor.pending(), 1);

        drop(delay);
        assert_eq!(reactor.pending(), 0);
    }
}
