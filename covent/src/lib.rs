//! Lazily started, multi-awaiter async tasks driven by a completion reactor.
//!
//! A [`Task`] is a shared handle to a suspended computation. Its body starts
//! on the first await (or an explicit [`Task::start`]), runs inline until it
//! suspends, and publishes its result once for every awaiter. Suspensions are
//! resumed by a [`Reactor`], which the [`Runner`] pumps on the calling thread
//! until the root task completes.
//!
//! ```no_run
//! use covent::{Task, time};
//! use std::time::Duration;
//!
//! #[covent::main]
//! async fn main() -> anyhow::Result<()> {
//!     let delayed = |value: u32| {
//!         Task::new(async move {
//!             time::sleep(Duration::from_millis(100)).await?;
//!             Ok(value)
//!         })
//!     };
//!
//!     let (a, b) = (delayed(1), delayed(2));
//!     a.start();
//!     b.start();
//!
//!     assert_eq!((&a).await? + (&b).await?, 3);
//!     Ok(())
//! }
//! ```

#[doc(inline)]
pub use covent_macros::main;

#[doc(inline)]
pub use covent_macros::test;

pub mod context;

pub mod error;
pub use error::{Error, Failure, Panic};

pub mod reactor;
pub use reactor::{Event, Reactor, TimerReactor, UringReactor};

pub mod runtime;
pub use runtime::{Runner, run, run_with};

pub mod task;
pub use task::{Id, RootTask, Task, spawn};

pub mod time;

#[doc(hidden)]
pub mod __private {
    use std::future::Future;

    /// Root future for the body of a `#[covent::main]` or `#[covent::test]`
    /// function.
    pub fn entry<F>(body: F) -> impl Future<Output = anyhow::Result<F::Output>> + 'static
    where
        F: Future + 'static,
    {
        async move { Ok(body.await) }
    }
}

#[cfg(test)]
mod test_utils;
