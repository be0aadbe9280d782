//! Thread-local runtime state: the active reactor registry and the frame
//! currently being resumed.

use crate::error::Error;
use crate::reactor::Reactor;
use crate::task::{Header, Id};
use log::debug;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;
use std::thread_local;

thread_local! {
    static ACTIVE_REACTOR: RefCell<Option<Rc<dyn Reactor>>> = const { RefCell::new(None) };

    static CURRENT_TASK: Cell<Option<NonNull<Header>>> = const { Cell::new(None) };
}

/// Registers `reactor` as the active reactor of the calling thread.
///
/// At most one reactor is active per thread, a second installation fails with
/// [`Error::NestedLoop`] and leaves the first one in place. The returned guard
/// deactivates the reactor when dropped.
pub fn install(reactor: Rc<dyn Reactor>) -> Result<ReactorGuard, Error> {
    ACTIVE_REACTOR.with(|active| {
        let mut active = active.borrow_mut();

        if active.is_some() {
            return Err(Error::NestedLoop);
        }

        *active = Some(reactor);
        debug!("Reactor installed on thread {:?}", std::thread::current().id());

        Ok(ReactorGuard { _p: PhantomData })
    })
}

/// Uninstalls the active reactor on drop.
#[must_use = "the reactor is uninstalled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReactorGuard {
    // Must be dropped on the thread that installed it.
    _p: PhantomData<*const ()>,
}

impl Drop for ReactorGuard {
    fn drop(&mut self) {
        // Keep the reactor alive until the borrow is released, its drop may
        // run arbitrary code.
        let reactor = ACTIVE_REACTOR.with(|active| active.borrow_mut().take());
        debug!("Reactor uninstalled from thread {:?}", std::thread::current().id());
        drop(reactor);
    }
}

/// True if a reactor is active on the calling thread.
pub fn is_active() -> bool {
    ACTIVE_REACTOR.with(|active| active.borrow().is_some())
}

/// Returns the active reactor of the calling thread.
pub fn active_reactor() -> Option<Rc<dyn Reactor>> {
    ACTIVE_REACTOR.with(|active| active.borrow().clone())
}

/// Returns the reactor that operations issued from here should use.
///
/// Inside a task body this is the reactor that was active when the task was
/// created, falling back to the active one for tasks created outside of any
/// run.
pub fn current_reactor() -> Option<Rc<dyn Reactor>> {
    let captured = CURRENT_TASK.with(|current| {
        current
            .get()
            .and_then(|header| unsafe { header.as_ref() }.reactor())
    });

    captured.or_else(active_reactor)
}

pub(crate) fn current_task_id() -> Option<Id> {
    CURRENT_TASK.with(|current| current.get().map(|header| unsafe { header.as_ref() }.id()))
}

/// Marks `header` as the frame being resumed until the guard is dropped.
pub(crate) fn enter_task(header: NonNull<Header>) -> EnterGuard {
    EnterGuard {
        parent: CURRENT_TASK.with(|current| current.replace(Some(header))),
    }
}

/// Restores the previously resumed frame, frames nest when a body starts a
/// child inline.
pub(crate) struct EnterGuard {
    parent: Option<NonNull<Header>>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|current| current.set(self.parent));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Task;
    use crate::test_utils::*;
    use anyhow::Result;
    use std::time::Duration;

    #[test]
    fn test_nested_install_fails() -> Result<()> {
        let first: Rc<dyn Reactor> = Rc::new(MockReactor::default());
        let second: Rc<dyn Reactor> = Rc::new(MockReactor::default());

        assert!(!is_active());
        let guard = install(first.clone())?;
        assert!(is_active());

        assert_eq!(install(second.clone()).unwrap_err(), Error::NestedLoop);

        // The first reactor is still the active one.
        let active = active_reactor().expect("active reactor");
        assert!(Rc::ptr_eq(&active, &first));
        drop(active);

        drop(guard);
        assert!(!is_active());

        let _guard = install(second)?;
        assert!(is_active());
        Ok(())
    }

    #[test]
    fn test_current_reactor_prefers_captured() -> Result<()> {
        let creator: Rc<dyn Reactor> = Rc::new(MockReactor::default());
        let task = {
            let _guard = install(creator.clone())?;
            Task::new(async {
                let reactor = current_reactor().expect("reactor");
                Ok(reactor.pending())
            })
        };

        let other = Rc::new(MockReactor::default());
        let _event = other.schedule_delay(Duration::from_millis(1));
        let _guard = install(other.clone())?;

        assert!(task.start());
        assert_eq!(task.result()?, &0);
        Ok(())
    }

    #[test]
    fn test_current_reactor_falls_back_to_active() -> Result<()> {
        assert!(current_reactor().is_none());

        let task = Task::new(async { Ok(current_reactor().map(|r| r.pending())) });

        let reactor = Rc::new(MockReactor::default());
        let _event = reactor.schedule_delay(Duration::from_millis(5));
        let _guard = install(reactor.clone())?;

        assert!(task.start());
        assert_eq!(task.result()?, &Some(1));
        Ok(())
    }
}
