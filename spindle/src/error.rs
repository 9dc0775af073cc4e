//! Error types shared by every layer of the runtime.
//!
//! Reactor and socket failures surface as [`Error::Io`]. The remaining
//! variants describe misuse of the I/O buffers or of the yield-token
//! vocabulary; inside a task they travel as [`Signal::Error`](crate::task::Signal)
//! and unwind only the offending task.

use crate::task::TaskId;

use std::io;
use std::os::fd::RawFd;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operating system call failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The descriptor already has a reactor registration.
    #[error("file descriptor {0} is already registered with the reactor")]
    AlreadyRegistered(RawFd),

    /// `add` was called on an out queue after `close_request`.
    #[error("out queue is closed")]
    QueueClosed,

    /// The out queue holds at least `limit` bytes already.
    #[error("out queue limit of {limit} bytes reached")]
    LimitReached { limit: usize },

    /// The out queue is drained and its owner asked for the stream to close.
    #[error("close requested")]
    CloseRequested,

    /// A socket token was yielded by a task that owns no connection.
    #[error("task {0} has no associated connection")]
    NoConnection(TaskId),

    /// A cross-task token named a task that is not alive.
    #[error("task {0} does not exist")]
    NoSuchTask(TaskId),

    /// Tokens that cannot be combined, or a token used where it makes no sense.
    #[error("incompatible tokens: {0}")]
    IncompatibleTokens(&'static str),

    /// The job submitted through a cross-task call did not complete.
    #[error("call into task {task} failed: {reason}")]
    CallFailed { task: TaskId, reason: String },

    /// The reactor behind a remote handle has shut down.
    #[error("runtime has shut down")]
    Shutdown,

    /// Application-level framing or protocol violation.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    /// Builds an [`Error::Protocol`] from any message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    /// Returns `true` for errors that a retry of the same readiness
    /// condition will resolve.
    pub(crate) fn is_transient(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        )
    }
}
