//! # Spindle
//!
//! **Spindle** is a single-threaded cooperative runtime for network services.
//!
//! Application logic is written as [`Computation`](task::Computation)s: small
//! resumable state machines that ask the runtime for I/O, timers and
//! synchronization by yielding [`Token`](task::Token)s. A task is an explicit
//! stack of computations, so protocol code can be split into nested
//! sub-computations of any depth without ever touching the native stack.
//!
//! The runtime provides:
//!
//! - An **epoll reactor** with one-shot timers that batch inside a small allowance window
//! - **Framed reads** (`n` bytes, up to a delimiter, or whatever arrived) through an [`InBuffer`](io::InBuffer)
//! - **Queued writes** with priorities, coalescing, streaming sources and backpressure through an [`OutQueue`](io::OutQueue)
//! - A **named wait/fire rendezvous** and **cross-task calls** between tasks
//! - **Services** that accept TCP connections and give each one its own task
//! - **Macros** `#[spindle::main]` and `#[spindle::test]`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spindle::net::Service;
//! use spindle::task::{Resume, Step, Token, from_fn};
//!
//! fn echo() -> impl spindle::task::Computation {
//!     from_fn(|input| match input {
//!         Resume::Start => Token::until_eol().into(),
//!         Resume::Value(line) => match line.into_bytes() {
//!             Some(line) if line.as_ref() == b"quit\r\n" => Step::done(()),
//!             Some(line) => Token::send(line).into(),
//!             None => Token::until_eol().into(),
//!         },
//!         Resume::Signal(signal) => Step::Raise(signal),
//!     })
//! }
//!
//! #[spindle::main]
//! fn main(runtime: &spindle::Runtime) -> spindle::Result<()> {
//!     runtime.add_service(Service::new("127.0.0.1:7000".parse().unwrap(), |_| echo()))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`task`]: Computations, tokens and values
//! - [`io`]: The read-side and write-side buffers of a connection
//! - [`net`]: Services and connections
//! - [`sync`]: Coordination helpers built on wait/fire

mod error;
mod reactor;
mod runtime;
mod utils;

pub mod io;
pub mod net;
pub mod sync;

pub use error::{Error, Result};
pub use reactor::{Reactor, Remote, Timer};
pub use runtime::Runtime;
pub use runtime::builder::RuntimeBuilder;
pub use runtime::task;

pub use spindle_macros::*;
