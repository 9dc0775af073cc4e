//! The task runtime.
//!
//! [`Runtime`] owns the reactor together with every task. Tasks are driven
//! on the thread that calls [`Runtime::run`]; whenever a task yields a token
//! that cannot complete right away it is parked, and a reactor callback
//! (a timer, a readable socket, another task's fire or reply) resumes it.
//!
//! Nothing here is `Send`: one runtime, one thread. Work produced on other
//! threads re-enters through a [`Remote`](crate::Remote).

pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod core;
mod waits;

pub mod task;

pub use self::core::Runtime;
