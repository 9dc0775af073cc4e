//! Reactor core and event handling.
//!
//! This module implements the event hub of the runtime.
//! The reactor is responsible for:
//! - multiplexing OS readiness for registered descriptors,
//! - managing one-shot timers,
//! - running the callbacks attached to both.
//!
//! Everything above it (connections, the task engine, services) is driven
//! from these callbacks. Work coming from other threads enters through a
//! [`Remote`] handle.

mod core;
mod event;
mod timer;

pub(crate) mod command;
pub(crate) mod poller;

pub(crate) use core::ReactorConfig;

pub use command::Remote;
pub use core::Reactor;
pub use timer::Timer;
