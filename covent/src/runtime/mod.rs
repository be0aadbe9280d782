//! Running a root task to completion.

// Used wherever we rely on SmallVec to store entries on stack first.
// Prevent most heap allocations when a burst of completions or wakers arrives.
pub(crate) const SPILL_TO_HEAP_THRESHOLD: usize = 16;

mod builder;
pub use builder::{Builder, ReactorConfig};

mod runner;
pub use runner::{Runner, run, run_with};
