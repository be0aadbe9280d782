//! Lazily started, multi-awaiter tasks.
//!
//! A task frame is a single allocation holding a [`Header`], the result slot
//! and the body. Handles ([`Task`], [`RootTask`]) and wakers point to the
//! header and keep the frame alive through an explicit reference count. The
//! frame also holds a reference to itself between its start and completion,
//! so a running body survives the loss of every handle.

mod header;
pub(crate) use self::header::Header;

pub mod id;
pub use self::id::{Id, id, try_id};

mod join;
pub use self::join::{Join, JoinOwned, WhenReady};

mod layout;

mod outcome;

mod raw;

mod remote;
pub(crate) use self::remote::{has_deferred, run_deferred};

mod root;
pub use self::root::RootTask;

mod state;

#[allow(clippy::module_inception)]
mod task;
pub use self::task::{Task, spawn};

mod waiter;

mod waker;
