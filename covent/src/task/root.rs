use crate::error::Error;
use crate::task::Id;
use crate::task::raw::RawTask;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::task::Waker;

/// An eagerly started, uniquely owned task driven from outside the runtime.
///
/// Unlike [`Task`], the body runs as soon as the root is created, and the
/// `parent` waker passed at creation is woken once it completes. Dropping the
/// root destroys the body, whether or not it finished.
///
/// [`Task`]: crate::Task
pub struct RootTask<T> {
    raw: RawTask,
    _p: PhantomData<(T, *const ())>,
}

impl<T: 'static> RootTask<T> {
    pub fn spawn<F>(future: F, parent: Waker) -> RootTask<T>
    where
        F: Future<Output = anyhow::Result<T>> + 'static,
    {
        let raw = RawTask::new::<T, F>(future);

        // Safety: the frame was never started and does not escape this thread.
        unsafe { raw.set_continuation(parent) };
        raw.start();

        RootTask {
            raw,
            _p: PhantomData,
        }
    }
}

impl<T> RootTask<T> {
    pub fn done(&self) -> bool {
        self.raw.is_ready()
    }

    pub fn id(&self) -> Id {
        self.raw.id()
    }

    pub fn result(&self) -> Result<&T, Error> {
        if !self.raw.is_ready() {
            return Err(Error::NotReady);
        }

        unsafe { self.raw.frame::<T>().outcome.get() }
    }

    pub fn into_result(self) -> Result<T, Error> {
        if !self.raw.is_ready() {
            return Err(Error::NotReady);
        }

        unsafe { self.raw.frame::<T>().outcome.take() }
    }
}

impl<T> Drop for RootTask<T> {
    fn drop(&mut self) {
        self.raw.cancel();
        self.raw.drop_reference();
    }
}

impl<T> fmt::Debug for RootTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootTask")
            .field("id", &self.raw.id())
            .field("readiness", &self.raw.header().readiness)
            .finish()
    }
}
