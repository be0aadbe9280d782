#![allow(unsafe_op_in_unsafe_fn)]

use crate::error::Error;
use crate::reactor::{Event, Reactor};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::mem::ManuallyDrop;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct WakerData {
    pub wake_count: AtomicUsize,
}

impl WakerData {
    pub(crate) fn get_count(&self) -> usize {
        self.wake_count.load(Ordering::Relaxed)
    }
}

unsafe fn mock_wake(data: *const ()) {
    // Need to consume 1 Arc reference
    let data = Arc::<WakerData>::from_raw(data.cast());
    data.wake_count.fetch_add(1, Ordering::Relaxed);
}

unsafe fn mock_wake_by_ref(data: *const ()) {
    // Not consuming any Arc ref
    let data = ManuallyDrop::new(Arc::<WakerData>::from_raw(data.cast()));
    data.wake_count.fetch_add(1, Ordering::Relaxed);
}

unsafe fn mock_drop(data: *const ()) {
    drop(Arc::<WakerData>::from_raw(data.cast()));
}

unsafe fn mock_clone(data: *const ()) -> RawWaker {
    Arc::<WakerData>::increment_strong_count(data.cast());
    RawWaker::new(data, &MOCK_VTABLE)
}

static MOCK_VTABLE: RawWakerVTable =
    RawWakerVTable::new(mock_clone, mock_wake, mock_wake_by_ref, mock_drop);

// Mocking where the Waker will increment the atomic everytime it is woken up.
// Calling Arc::into_raw *does not decrement the reference count*, so every
// leaked ptr is reclaimed by `mock_drop` or `mock_wake`.
pub(crate) fn mock_waker() -> (Waker, Arc<WakerData>) {
    let data = Arc::new(WakerData::default());
    let raw_data = Arc::into_raw(Arc::clone(&data));

    let raw_waker = RawWaker::new(raw_data as *const (), &MOCK_VTABLE);

    unsafe { (Waker::from_raw(raw_waker), data) }
}

#[derive(Default)]
struct Timer {
    deadline: Duration,
    waker: Option<Waker>,
    fired: bool,
}

#[derive(Default)]
struct Clock {
    now: Cell<Duration>,
    timers: RefCell<BTreeMap<u64, Timer>>,
    next_id: Cell<u64>,
}

/// Reactor over a virtual clock. Delays are registered as soon as they are
/// scheduled, and each `advance` jumps the clock to the earliest deadline.
#[derive(Clone, Default)]
pub(crate) struct MockReactor {
    clock: Rc<Clock>,
}

impl MockReactor {
    /// Virtual time elapsed since creation.
    pub(crate) fn now(&self) -> Duration {
        self.clock.now.get()
    }
}

impl Reactor for MockReactor {
    fn advance(&self) -> Result<usize, Error> {
        let wakers = {
            let mut timers = self.clock.timers.borrow_mut();

            let Some(deadline) = timers
                .values()
                .filter(|t| !t.fired)
                .map(|t| t.deadline)
                .min()
            else {
                return Ok(0);
            };

            self.clock.now.set(deadline);

            timers
                .values_mut()
                .filter(|t| !t.fired && t.deadline == deadline)
                .map(|t| {
                    t.fired = true;
                    t.waker.take()
                })
                .collect::<Vec<_>>()
        };

        let n = wakers.len();
        wakers.into_iter().flatten().for_each(Waker::wake);
        Ok(n)
    }

    fn schedule_delay(&self, duration: Duration) -> Event {
        let id = self.clock.next_id.get();
        self.clock.next_id.set(id + 1);

        self.clock.timers.borrow_mut().insert(
            id,
            Timer {
                deadline: self.now() + duration,
                ..Default::default()
            },
        );

        Event::new(MockDelay {
            clock: self.clock.clone(),
            id,
        })
    }

    fn pending(&self) -> usize {
        self.clock
            .timers
            .borrow()
            .values()
            .filter(|t| !t.fired)
            .count()
    }
}

struct MockDelay {
    clock: Rc<Clock>,
    id: u64,
}

impl Future for MockDelay {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut timers = self.clock.timers.borrow_mut();
        let timer = timers.get_mut(&self.id).expect("polled after completion");

        if timer.fired {
            timers.remove(&self.id);
            return Poll::Ready(Ok(()));
        }

        timer.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for MockDelay {
    fn drop(&mut self) {
        self.clock.timers.borrow_mut().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_mock_raw_waker() {
        let (waker1, waker_data) = mock_waker();
        waker1.wake_by_ref();
        assert_eq!(waker_data.get_count(), 1);

        let waker2 = waker1.clone();
        waker2.wake();
        assert_eq!(waker_data.get_count(), 2);

        drop(waker1);
        assert_eq!(waker_data.get_count(), 2);
        assert_eq!(Arc::strong_count(&waker_data), 1);
    }

    #[test]
    fn test_mock_reactor_fires_earliest_first() {
        let reactor = MockReactor::default();
        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);

        let mut late = reactor.schedule_delay(Duration::from_secs(2));
        let mut early = reactor.schedule_delay(Duration::from_secs(1));
        assert_eq!(reactor.pending(), 2);
        assert!(late.poll_unpin(&mut cx).is_pending());
        assert!(early.poll_unpin(&mut cx).is_pending());

        assert!(matches!(reactor.advance(), Ok(1)));
        assert_eq!(reactor.now(), Duration::from_secs(1));
        assert_eq!(data.get_count(), 1);
        assert!(matches!(early.poll_unpin(&mut cx), Poll::Ready(Ok(()))));
        assert!(late.poll_unpin(&mut cx).is_pending());

        assert!(matches!(reactor.advance(), Ok(1)));
        assert_eq!(reactor.pending(), 0);
        assert!(matches!(reactor.advance(), Ok(0)));
    }
}
