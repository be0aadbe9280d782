//! Delays driven by the current reactor.

use crate::context;
use crate::error::Error;
use crate::reactor::Event;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Waits until `duration` has elapsed.
///
/// The delay is scheduled on the reactor of the task polling it, on first
/// poll. Polling outside of any reactor fails with [`Error::NoReactor`].
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        duration,
        event: None,
    }
}

/// Future returned by [`sleep`].
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Sleep {
    duration: Duration,
    event: Option<Event>,
}

impl Sleep {
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Future for Sleep {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let event = match this.event.take() {
            Some(event) => event,
            None => {
                let Some(reactor) = context::current_reactor() else {
                    return Poll::Ready(Err(Error::NoReactor));
                };

                reactor.schedule_delay(this.duration)
            }
        };

        Pin::new(this.event.insert(event)).poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as covent;
    use crate::Task;
    use crate::reactor::Reactor;
    use crate::test_utils::*;
    use futures::FutureExt;
    use rstest::rstest;
    use std::time::Instant;

    #[test]
    fn test_sleep_without_reactor() {
        let res = sleep(Duration::from_millis(1)).now_or_never();
        assert_eq!(res, Some(Err(Error::NoReactor)));
    }

    #[test]
    fn test_sleep_uses_captured_reactor() -> anyhow::Result<()> {
        let reactor = std::rc::Rc::new(MockReactor::default());

        let task = {
            let _guard = context::install(reactor.clone())?;
            Task::new(async {
                sleep(Duration::from_secs(3)).await?;
                Ok(())
            })
        };

        // Started after the reactor was uninstalled, the frame still knows it.
        task.start();
        assert_eq!(reactor.pending(), 1);

        reactor.advance()?;
        assert!(task.done());
        assert_eq!(reactor.now(), Duration::from_secs(3));
        Ok(())
    }

    #[rstest]
    #[case::zero(Duration::ZERO)]
    #[case::short(Duration::from_millis(5))]
    #[case::longer(Duration::from_millis(20))]
    #[covent::test(reactor = "timer")]
    async fn test_sleep_duration_is_accurate(#[case] duration: Duration) -> anyhow::Result<()> {
        let start = Instant::now();
        sleep(duration).await?;
        let elapsed = start.elapsed();

        // The sleep should last for *at least* the specified duration.
        assert!(
            elapsed >= duration,
            "Sleep was shorter than expected. Elapsed: {:?}, Expected: >= {:?}",
            elapsed,
            duration
        );

        // We add a generous margin to prevent flaky tests on loaded systems.
        let upper_bound = duration + Duration::from_millis(50);
        assert!(
            elapsed < upper_bound,
            "Sleep was much longer than expected. Elapsed: {:?}, Expected: < {:?}",
            elapsed,
            upper_bound
        );

        Ok(())
    }
}
