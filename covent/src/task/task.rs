use crate::error::Error;
use crate::task::Id;
use crate::task::join::{Join, JoinOwned, WhenReady};
use crate::task::raw::RawTask;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;

/// A shared handle to a lazily started task frame.
///
/// Creating a `Task` allocates the frame but does not run the body. The body
/// starts on the first of [`Task::start`] or the first await of any handle,
/// and runs inline on the caller's stack up to its first suspension point.
///
/// Handles are cheap to clone: every clone refers to the same frame, and any
/// number of them may await it concurrently. All of them observe the same
/// value, or the same [`Failure`] instance if the body failed.
///
/// Awaiting `&Task<T>` yields `Result<&T, Error>`, awaiting an owned
/// `Task<T>` yields a clone of the value. A null handle (default constructed
/// or emptied by [`Task::take`]) yields [`Error::BrokenPromise`].
///
/// Tasks are bound to the thread that created them.
///
/// # Examples
///
/// ```no_run
/// use covent::{Task, time};
/// use std::time::Duration;
///
/// let value = covent::run(|| {
///     let shared = Task::new(async {
///         time::sleep(Duration::from_millis(10)).await?;
///         Ok(21)
///     });
///
///     Task::new(async move {
///         let (a, b) = (shared.clone(), shared.clone());
///         Ok((&a).await? + (&b).await?)
///     })
/// })?;
///
/// assert_eq!(value, 42);
/// # Ok::<(), covent::Error>(())
/// ```
///
/// [`Failure`]: crate::Failure
pub struct Task<T> {
    raw: Option<RawTask>,
    _p: PhantomData<(T, *const ())>,
}

impl<T: 'static> Task<T> {
    /// Allocates a frame for `future` without running it.
    pub fn new<F>(future: F) -> Task<T>
    where
        F: Future<Output = anyhow::Result<T>> + 'static,
    {
        Task {
            raw: Some(RawTask::new::<T, F>(future)),
            _p: PhantomData,
        }
    }
}

impl<T> Task<T> {
    /// Starts the body if it was never started. Returns true if this call
    /// started it, false if it was already started or the handle is null.
    pub fn start(&self) -> bool {
        self.raw.is_some_and(RawTask::start)
    }

    /// True once the result is published.
    pub fn done(&self) -> bool {
        self.raw.is_some_and(|raw| raw.is_ready())
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_none()
    }

    /// Id of the frame, `None` for a null handle.
    pub fn id(&self) -> Option<Id> {
        self.raw.map(|raw| raw.id())
    }

    /// Borrows the published result without waiting.
    pub fn result(&self) -> Result<&T, Error> {
        let raw = self.raw.as_ref().ok_or(Error::BrokenPromise)?;

        if !raw.is_ready() {
            return Err(Error::NotReady);
        }

        // Safety: `T` is the output type the frame was allocated with, and the
        // acquire load above makes the slot visible.
        unsafe { raw.frame::<T>().outcome.get() }
    }

    /// Moves the frame out, leaving a null handle behind.
    pub fn take(&mut self) -> Task<T> {
        Task {
            raw: self.raw.take(),
            _p: PhantomData,
        }
    }

    /// Waits for completion without reading the result.
    ///
    /// Failures are not raised here, they stay in the frame for whoever reads
    /// the result.
    pub fn when_ready(&self) -> WhenReady<'_, T> {
        WhenReady::new(self)
    }

    /// Moves the value out of the frame.
    ///
    /// Only the last handle may do this. Failures are reported to every
    /// handle, so they are cloned rather than moved.
    pub fn into_result(self) -> Result<T, Error> {
        let raw = self.raw.ok_or(Error::BrokenPromise)?;

        if !raw.is_ready() {
            return Err(Error::NotReady);
        }

        let others = raw.header().handles.get() - 1;
        if others > 0 {
            return Err(Error::SharedResult(others));
        }

        // Safety: this is the only handle, so nobody borrows the slot.
        unsafe { raw.frame::<T>().outcome.take() }
    }

    /// True if other handles refer to the same frame.
    pub(crate) fn is_shared(&self) -> bool {
        self.raw.is_some_and(|raw| raw.header().handles.get() > 1)
    }

    pub(super) fn raw(&self) -> Option<RawTask> {
        self.raw
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().ref_count())
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            let header = raw.header();
            header.handles.set(header.handles.get() + 1);
            raw.ref_inc();
        }

        Task {
            raw: self.raw,
            _p: PhantomData,
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            let header = raw.header();
            header.handles.set(header.handles.get() - 1);
            raw.drop_reference();
        }
    }
}

impl<T> Default for Task<T> {
    fn default() -> Self {
        Task {
            raw: None,
            _p: PhantomData,
        }
    }
}

/// Handles are equal when they refer to the same frame. Null handles are equal
/// to each other.
impl<T> PartialEq for Task<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Task<T> {}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw {
            None => f.write_str("Task(null)"),
            Some(raw) => f
                .debug_struct("Task")
                .field("id", &raw.id())
                .field("readiness", &raw.header().readiness)
                .finish(),
        }
    }
}

impl<'a, T> IntoFuture for &'a Task<T> {
    type Output = Result<&'a T, Error>;
    type IntoFuture = Join<'a, T>;

    fn into_future(self) -> Self::IntoFuture {
        Join::new(self)
    }
}

impl<T: Clone> IntoFuture for Task<T> {
    type Output = Result<T, Error>;
    type IntoFuture = JoinOwned<T>;

    fn into_future(mut self) -> Self::IntoFuture {
        JoinOwned::new(self.take())
    }
}

/// Creates a task and starts it right away, returning a handle to await it.
pub fn spawn<T, F>(future: F) -> Task<T>
where
    F: Future<Output = anyhow::Result<T>> + 'static,
    T: 'static,
{
    let task = Task::new(future);
    task.start();
    task
}
