use crate::context;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{fmt, num::NonZeroU64};

/// An opaque ID that uniquely identifies a task frame.
///
/// Ids are assigned when the frame is allocated, so every handle of the same
/// task reports the same id. Ids are never re-used within a process.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Id(NonZeroU64);

/// Returns the [`Id`] of the task currently being resumed.
///
/// # Panics
///
/// Panics if called from outside a task body. See [`try_id`] for a version
/// that does not panic.
pub fn id() -> Id {
    context::current_task_id().expect("Can't get a task id when not inside a task")
}

/// Returns the [`Id`] of the task currently being resumed, or `None` if called
/// outside of a task body.
pub fn try_id() -> Option<Id> {
    context::current_task_id()
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Id {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Wrapping around would take centuries even at a billion frames/sec.
        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique task ID: bitspace exhausted")
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Task;
    use anyhow::Result;
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::rc::Rc;

    #[test]
    fn test_new_task_id_unique() -> Result<()> {
        let n = 13;
        let mut all_ids = HashSet::with_capacity(n);

        for _ in 1..=n {
            let task = Task::new(async { Ok(42) });
            let clone = task.clone();

            assert_eq!(task.id(), clone.id());
            all_ids.insert(task.id());
        }

        assert_eq!(all_ids.len(), n);
        Ok(())
    }

    #[test]
    fn test_try_id_inside_and_outside_task() -> Result<()> {
        assert_eq!(try_id(), None);

        let observed = Rc::new(Cell::new(None));
        let task = {
            let observed = observed.clone();
            Task::new(async move {
                observed.set(try_id());
                Ok(())
            })
        };

        assert!(task.start());
        assert!(task.done());
        assert_eq!(observed.get(), task.id());
        assert_eq!(try_id(), None);
        Ok(())
    }
}
