use crate::context;
use crate::error::Error;
use crate::reactor::{Reactor, UringReactor};
use crate::runtime::ReactorConfig;
use crate::task::{self, RootTask, Task};
use log::{debug, trace};
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Wake, Waker};

thread_local! {
    // Reused across `run` calls on the same thread, so repeated short runs do
    // not pay for ring setup every time.
    static CACHED_REACTOR: RefCell<Option<UringReactor>> = const { RefCell::new(None) };
}

/// Drives a root task to completion on the calling thread.
///
/// The runner installs its reactor for the duration of [`Runner::run`], so
/// tasks created inside pick it up, and pumps [`Reactor::advance`] until the
/// root reports done. Wakes sent from other threads are replayed between two
/// advances.
#[derive(Debug)]
pub struct Runner<R> {
    reactor: Rc<R>,
}

impl<R: Reactor + 'static> Runner<R> {
    pub fn new(reactor: R) -> Self {
        Runner {
            reactor: Rc::new(reactor),
        }
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    /// Installs the reactor, creates the root task with `f` and advances the
    /// reactor until the root is done.
    ///
    /// Returns the root's value, or its failure. The value is moved out when
    /// the returned task is the last handle to its frame, and cloned when `f`
    /// kept other handles. Fails with [`Error::NestedLoop`] if a reactor is
    /// already active on this thread, and with [`Error::Stalled`] if the root
    /// is suspended while nothing could ever resume it.
    pub fn run<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Clone + 'static,
        F: FnOnce() -> Task<T>,
    {
        let _guard = context::install(self.reactor.clone() as Rc<dyn Reactor>)?;

        let task = f();
        let signal = Arc::new(Signal::default());
        let root = {
            let task = task.clone();
            RootTask::spawn(
                async move {
                    task.when_ready().await;
                    Ok(())
                },
                Waker::from(signal.clone()),
            )
        };

        self.drive(&root, &signal)?;
        drop(root);

        if task.is_shared() {
            task.result().cloned()
        } else {
            task.into_result()
        }
    }

    /// Runs `future` as the root task and advances the reactor until it
    /// completes.
    ///
    /// The root is owned by the runner alone, so its value is always moved
    /// out and needs no `Clone`. Fails like [`Runner::run`].
    pub fn block_on<T, F>(&self, future: F) -> Result<T, Error>
    where
        T: 'static,
        F: Future<Output = anyhow::Result<T>> + 'static,
    {
        let _guard = context::install(self.reactor.clone() as Rc<dyn Reactor>)?;

        let signal = Arc::new(Signal::default());
        let root = RootTask::spawn(future, Waker::from(signal.clone()));

        self.drive(&root, &signal)?;
        root.into_result()
    }

    fn drive<T>(&self, root: &RootTask<T>, signal: &Signal) -> Result<(), Error> {
        debug!("Driving root task {}", root.id());

        loop {
            task::run_deferred();

            if signal.is_woken() {
                debug_assert!(root.done());
                return Ok(());
            }

            if self.reactor.pending() == 0 {
                // A remote wake may have landed after the replay above.
                if task::has_deferred() {
                    continue;
                }

                return Err(Error::Stalled);
            }

            let n = self.reactor.advance()?;
            trace!("Dispatched {} completions", n);
        }
    }
}

/// Parent continuation of the root, woken by the frame once it completes.
#[derive(Default)]
struct Signal {
    woken: AtomicBool,
}

impl Signal {
    fn is_woken(&self) -> bool {
        self.woken.load(Ordering::Acquire)
    }
}

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::Release);
    }
}

/// Runs the task produced by `f` on this thread's cached [`UringReactor`].
///
/// The reactor is created with the default configuration on first use and
/// reused by later calls on the same thread.
///
/// ```no_run
/// use covent::Task;
///
/// let answer = covent::run(|| Task::new(async { Ok(42) }))?;
/// assert_eq!(answer, 42);
/// # Ok::<(), covent::Error>(())
/// ```
pub fn run<T, F>(f: F) -> Result<T, Error>
where
    T: Clone + 'static,
    F: FnOnce() -> Task<T>,
{
    let reactor = CACHED_REACTOR.with(|cached| -> Result<UringReactor, Error> {
        let mut cached = cached.borrow_mut();

        if let Some(reactor) = cached.as_ref() {
            return Ok(reactor.clone());
        }

        let reactor = UringReactor::new()?;
        *cached = Some(reactor.clone());
        Ok(reactor)
    })?;

    Runner::new(reactor).run(f)
}

/// Like [`run`], on a fresh [`UringReactor`] built from `cfg`.
pub fn run_with<T, F>(cfg: ReactorConfig, f: F) -> Result<T, Error>
where
    T: Clone + 'static,
    F: FnOnce() -> Task<T>,
{
    Runner::new(UringReactor::with_config(cfg)?).run(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::TimerReactor;
    use crate::test_utils::*;
    use crate::time;
    use anyhow::{Result, anyhow};
    use std::time::{Duration, Instant};

    #[test]
    fn test_run_returns_value() -> Result<()> {
        let runner = Runner::new(MockReactor::default());

        let value = runner.run(|| Task::new(async { Ok(7) }))?;
        assert_eq!(value, 7);
        assert!(!context::is_active());
        Ok(())
    }

    #[test]
    fn test_run_propagates_failure() {
        #[derive(Debug, thiserror::Error)]
        #[error("division by zero")]
        struct DivideByZero;

        let runner = Runner::new(MockReactor::default());
        let res = runner.run(|| Task::<u32>::new(async { Err(DivideByZero.into()) }));

        let err = res.unwrap_err();
        assert!(err.failure().is_some_and(|f| f.downcast_ref::<DivideByZero>().is_some()));
        assert!(!context::is_active());
    }

    #[test]
    fn test_run_drives_delays() -> Result<()> {
        let runner = Runner::new(MockReactor::default());

        let value = runner.run(|| {
            Task::new(async {
                time::sleep(Duration::from_secs(5)).await?;
                time::sleep(Duration::from_secs(5)).await?;
                Ok("slept")
            })
        })?;

        assert_eq!(value, "slept");
        assert_eq!(runner.reactor().now(), Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn test_nested_run_fails() -> Result<()> {
        let runner = Runner::new(MockReactor::default());

        let nested = runner.run(|| {
            Task::new(async {
                let inner = Runner::new(MockReactor::default());
                Ok(matches!(
                    inner.run(|| Task::new(async { Ok(()) })),
                    Err(Error::NestedLoop)
                ))
            })
        })?;

        assert!(nested);
        Ok(())
    }

    #[test]
    fn test_stalled_root() {
        let gate = Gate::new();
        let runner = Runner::new(MockReactor::default());

        let res = runner.run(|| {
            let gate = gate.clone();
            Task::new(async move {
                gate.wait().await;
                Ok(())
            })
        });

        assert_eq!(res, Err(Error::Stalled));
        assert!(!context::is_active());
    }

    #[test]
    fn test_shared_root_result() {
        let runner = Runner::new(MockReactor::default());
        let mut kept = Task::default();

        let res = runner.run(|| {
            let task = Task::new(async { Ok(1) });
            kept = task.clone();
            task
        });

        assert_eq!(res, Ok(1));
        assert!(matches!(kept.result(), Ok(&1)));
    }

    #[test]
    fn test_block_on_moves_value_out() -> Result<()> {
        #[derive(Debug, PartialEq)]
        struct NotClone(u32);

        let runner = Runner::new(MockReactor::default());
        let value = runner.block_on(async {
            time::sleep(Duration::from_secs(1)).await?;
            Ok(NotClone(4))
        })?;

        assert_eq!(value, NotClone(4));
        assert!(!context::is_active());
        Ok(())
    }

    #[test]
    fn test_wake_from_worker_thread() -> Result<()> {
        let runner = Runner::new(TimerReactor::new());
        let owner = std::thread::current().id();

        let resumed_on = runner.block_on(async {
            // Keeps the reactor busy until the worker had time to wake us.
            let guard = crate::spawn(async {
                time::sleep(Duration::from_millis(100)).await?;
                Ok(())
            });

            let mut worker = None;
            std::future::poll_fn(|cx| {
                if worker.is_some() {
                    return std::task::Poll::Ready(());
                }

                let waker = cx.waker().clone();
                worker = Some(std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    waker.wake();
                }));
                std::task::Poll::Pending
            })
            .await;

            if let Some(worker) = worker {
                worker.join().map_err(|_| anyhow!("worker panicked"))?;
            }

            (&guard).await?;
            Ok(std::thread::current().id())
        })?;

        assert_eq!(resumed_on, owner);
        Ok(())
    }

    #[test]
    fn test_timer_reactor_overlapping_delays() -> Result<()> {
        let runner = Runner::new(TimerReactor::new());
        let start = Instant::now();

        let total = runner.run(|| {
            let delayed = |ms: u64, value: u32| {
                Task::new(async move {
                    time::sleep(Duration::from_millis(ms)).await?;
                    Ok(value)
                })
            };

            Task::new(async move {
                let (a, b) = (delayed(50, 1), delayed(50, 2));
                a.start();
                b.start();
                Ok((&a).await? + (&b).await?)
            })
        })?;

        assert_eq!(total, 3);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(150));
        Ok(())
    }

    #[test]
    fn test_run_after_failure_reuses_thread() -> Result<()> {
        let runner = Runner::new(MockReactor::default());

        let first = runner.run(|| Task::<()>::new(async { Err(anyhow!("first")) }));
        assert!(first.is_err());

        assert_eq!(runner.run(|| Task::new(async { Ok(2) }))?, 2);
        Ok(())
    }
}
