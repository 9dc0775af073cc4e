//! Platform-specific I/O poller abstraction.
//!
//! The poller is used by the reactor to:
//! - wait for I/O readiness events,
//! - change the interest set of a descriptor (write interest is toggled),
//! - wake a blocked poll when another thread hands work to the reactor.
//!
//! The runtime targets Linux `epoll`; the socket helpers in [`unix`]
//! are shared by every unix target.

pub(crate) mod common;

pub(crate) use common::Waker;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
