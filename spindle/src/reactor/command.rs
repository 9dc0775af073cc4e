use super::poller::Waker;
use crate::error::{Error, Result};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;

/// Work handed to the reactor thread from elsewhere.
pub(crate) enum Command {
    /// Run the callback on the reactor thread during the next tick.
    Schedule(Box<dyn FnOnce() + Send>),

    /// Stop the event loop.
    Halt,
}

/// A `Send` handle to a reactor running on another thread.
///
/// Offload helpers (thread pools, blocking resolvers) use it to hand their
/// results back: the callback runs on the reactor thread, where it may spawn
/// tasks or fire rendezvous keys through [`Runtime::current`](crate::Runtime::current).
///
/// While at least one `Remote` is alive the reactor is never considered
/// idle, so `run()` keeps waiting for the remote work to come back.
pub struct Remote {
    /// Sender side of the command channel.
    sender: Sender<Command>,

    /// Waker used to interrupt the poller.
    waker: Arc<Waker>,

    /// Number of live handles, shared with the reactor.
    live: Arc<AtomicUsize>,
}

impl Remote {
    pub(crate) fn new(sender: Sender<Command>, waker: Arc<Waker>, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);

        Self {
            sender,
            waker,
            live,
        }
    }

    /// Schedules `f` to run on the reactor thread.
    pub fn schedule(&self, f: impl FnOnce() + Send + 'static) -> Result<()> {
        self.send(Command::Schedule(Box::new(f)))
    }

    /// Asks the reactor to stop after the current callback.
    pub fn halt(&self) -> Result<()> {
        self.send(Command::Halt)
    }

    /// Sends a command to the reactor and wakes it.
    fn send(&self, cmd: Command) -> Result<()> {
        self.sender.send(cmd).map_err(|_| Error::Shutdown)?;
        self.waker.wake();
        Ok(())
    }
}

impl Clone for Remote {
    fn clone(&self) -> Self {
        Remote::new(self.sender.clone(), self.waker.clone(), self.live.clone())
    }
}

impl Drop for Remote {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        // Let an otherwise idle loop notice that nothing can reach it anymore.
        self.waker.wake();
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("live", &self.live.load(Ordering::Acquire))
            .finish()
    }
}
