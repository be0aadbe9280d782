#![allow(clippy::needless_doctest_main)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Entry point macros for covent.

mod entry;
mod parse;

/// Marks an async function to be run as the root task of a
/// [`Runner`](../covent/struct.Runner.html).
///
/// The function body becomes the root task, driven on the calling thread until
/// it completes. The function returns whatever the body returns. The macro
/// panics if the reactor cannot be built or the body panics.
///
/// # Reactors
///
/// The default reactor is the `io_uring` backed `UringReactor`. Its rings can
/// be sized with `entries` (a power of two, default 256) and
/// `cq_size_multiplier` (default 2):
///
/// ```no_run
/// #[covent::main(entries = 64, cq_size_multiplier = 4)]
/// # async fn main() {}
/// ```
///
/// The portable `TimerReactor` only supports delays:
///
/// ```no_run
/// #[covent::main(reactor = "timer")]
/// # async fn main() {}
/// ```
///
/// # Function arguments
///
/// Function arguments are NOT allowed.
///
/// # Usage
///
/// ```no_run
/// #[covent::main]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// Equivalent code not using `#[covent::main]`
///
/// ```no_run
/// fn main() {
///     let reactor = covent::runtime::Builder::new().try_build().unwrap();
///
///     covent::Runner::new(reactor)
///         .block_on(async {
///             println!("Hello world");
///             Ok(())
///         })
///         .unwrap()
/// }
/// ```
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Marks an async function to be run as the root task of a fresh
/// [`Runner`](../covent/struct.Runner.html), suitable for tests.
///
/// Each test gets its own reactor. Accepts the same options as
/// [`macro@main`].
///
/// ```no_run
/// #[covent::test(reactor = "timer")]
/// async fn my_test() {
///     assert!(true);
/// }
/// ```
///
/// Equivalent code not using `#[covent::test]`
///
/// ```no_run
/// #[test]
/// fn my_test() {
///     covent::Runner::new(covent::reactor::TimerReactor::new())
///         .block_on(async {
///             assert!(true);
///             Ok(())
///         })
///         .unwrap()
/// }
/// ```
///
/// Test functions may take arguments, which lets the macro be combined with
/// `rstest` cases placed above it.
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}
