use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Errors surfaced by tasks, reactors and the runner.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The handle does not refer to a frame, either because it was default
    /// constructed or because its frame was taken by [`Task::take`].
    ///
    /// [`Task::take`]: crate::Task::take
    #[error("Broken promise: task handle does not refer to a frame")]
    BrokenPromise,

    /// A result was requested before the task completed.
    #[error("Task has not produced a result yet")]
    NotReady,

    #[error("Running nested loops is not supported")]
    NestedLoop,

    /// A reactor dependent operation was polled outside of [`Runner::run`].
    ///
    /// [`Runner::run`]: crate::Runner::run
    #[error("No reactor is active on this thread")]
    NoReactor,

    /// Neither the submission ring nor the completion slot table could take
    /// another request, even after flushing pending submissions.
    #[error("Submission queue is exhausted, cannot submit request")]
    SubmissionQueueFull,

    /// The root task is still pending but the reactor has nothing outstanding,
    /// so no completion could ever resume it.
    #[error("Root task is pending but no operation is outstanding on the reactor")]
    Stalled,

    #[error("Result is still shared by {0} other task handle(s)")]
    SharedResult(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The task body returned an error or panicked. Every handle of the same
    /// task observes the same [`Failure`] instance.
    #[error(transparent)]
    Failed(#[from] Failure),
}

impl Error {
    /// Returns the captured failure, if the task body failed.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Error::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Only failures raised by the kernel for a specific request are worth
    /// retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::SubmissionQueueFull => true,
            Error::Io(e) => matches!(
                e.raw_os_error(),
                Some(libc::EAGAIN) | Some(libc::EBUSY) | Some(libc::EINTR)
            ),
            _ => false,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use Error::*;

        match (self, other) {
            (BrokenPromise, BrokenPromise)
            | (NotReady, NotReady)
            | (NestedLoop, NestedLoop)
            | (NoReactor, NoReactor)
            | (SubmissionQueueFull, SubmissionQueueFull)
            | (Stalled, Stalled) => true,
            (SharedResult(a), SharedResult(b)) => a == b,
            (Io(a), Io(b)) => match (a.raw_os_error(), b.raw_os_error()) {
                (Some(a), Some(b)) => a == b,
                _ => a.kind() == b.kind(),
            },
            (Failed(a), Failed(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// A task failure shared by every handle of the task that produced it.
///
/// Cloning a `Failure` is cheap and preserves identity, which can be checked
/// with [`Failure::ptr_eq`].
#[derive(Clone)]
pub struct Failure(Arc<anyhow::Error>);

impl Failure {
    /// Captures the error returned by a task body.
    ///
    /// Failures forwarded from an awaited task (e.g. through `?`) are unwrapped
    /// so that the parent exposes the exact same instance as the child.
    pub(crate) fn capture(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(Error::Failed(failure)) => failure,
            Ok(other) => Failure(Arc::new(anyhow::Error::new(other))),
            Err(err) => Failure(Arc::new(err)),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        Failure(Arc::new(anyhow::Error::new(Panic { message })))
    }

    /// Attempts to downcast the underlying error to a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// True if both failures were captured from the same task body error.
    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// True if the failure was produced by a panic in the task body.
    pub fn is_panic(&self) -> bool {
        self.0.is::<Panic>()
    }

    pub fn as_anyhow(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        (**self.0).source()
    }
}

/// Error captured when a task body panics.
#[derive(thiserror::Error, Debug)]
#[error("Task panicked: {message}")]
pub struct Panic {
    message: String,
}

impl Panic {
    pub fn message(&self) -> &str {
        &self.message
    }
}
