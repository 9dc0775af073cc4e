//! Suspendable computations and the task trampoline.
//!
//! A task is an explicit stack of [`Computation`]s. Each resume answers with
//! a [`Step`]: push a nested computation, complete with a [`Value`], raise a
//! [`Signal`], or yield a [`Token`] for the runtime to interpret. Tokens are
//! the whole suspension contract between application code and the runtime;
//! computations never see the reactor.

mod computation;
mod token;
mod value;

pub(crate) mod core;

pub use self::core::TaskId;
pub use computation::{Computation, FromFn, Resume, Signal, Step, from_fn, once, ready};
pub use token::{Alt, Token};
pub use value::{Key, Value};

pub use crate::io::{Chunk, Term};
