use super::core::Inner;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

thread_local! {
    /// Thread-local handle to the runtime driving this thread.
    ///
    /// This is set while [`Runtime::run`](crate::Runtime::run) executes and
    /// allows computations and reactor callbacks to reach the runtime
    /// without explicit parameter passing.
    pub(crate) static CURRENT_RUNTIME: RefCell<Option<Weak<Inner>>> =
        const { RefCell::new(None) };
}

/// Enters the runtime execution context for the current thread.
///
/// The runtime is installed for the duration of the closure `f`;
/// afterwards the previous context is restored, so runtimes may nest.
pub(crate) fn enter_context<R>(inner: &Rc<Inner>, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_RUNTIME.with(|cell| cell.replace(Some(Rc::downgrade(inner))));

    let out = f();

    CURRENT_RUNTIME.with(|cell| cell.replace(previous));
    out
}

/// Returns the runtime of the current context, if any.
pub(crate) fn current() -> Option<Rc<Inner>> {
    CURRENT_RUNTIME.with(|cell| cell.borrow().as_ref().and_then(Weak::upgrade))
}
