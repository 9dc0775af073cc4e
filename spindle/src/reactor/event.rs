/// An I/O event reported by the poller.
///
/// An `Event` represents readiness information for a registered
/// file descriptor. It is produced by the poller and consumed
/// by the reactor, which turns it into exactly one callback.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Event {
    /// Token associated with the registered file descriptor.
    ///
    /// This token is the slab index of the registration inside the reactor.
    pub(crate) token: usize,

    /// Data (or an orderly hangup) is available to read.
    pub(crate) readable: bool,

    /// The descriptor accepts writes.
    pub(crate) writable: bool,

    /// The descriptor reported an error condition.
    pub(crate) error: bool,
}

/// The callback an [`Event`] is dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Read,
    Write,
    Error,
}

impl Event {
    /// Chooses the single callback this event runs.
    ///
    /// Any event that carries writability goes to the write side, so a
    /// pending out queue drains before more input is accepted. Pure
    /// read-class events go to the read side. An error with neither flag
    /// goes to the error handler.
    pub(crate) fn dispatch(&self) -> Dispatch {
        if self.writable {
            Dispatch::Write
        } else if self.readable {
            Dispatch::Read
        } else {
            Dispatch::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Dispatch, Event};

    fn event(readable: bool, writable: bool, error: bool) -> Event {
        Event {
            token: 0,
            readable,
            writable,
            error,
        }
    }

    #[test]
    fn test_read_only_event_goes_to_read() {
        assert_eq!(event(true, false, false).dispatch(), Dispatch::Read);
        assert_eq!(event(true, false, true).dispatch(), Dispatch::Read);
    }

    #[test]
    fn test_writable_event_goes_to_write() {
        assert_eq!(event(false, true, false).dispatch(), Dispatch::Write);
        assert_eq!(event(true, true, false).dispatch(), Dispatch::Write);
    }

    #[test]
    fn test_bare_error_goes_to_error() {
        assert_eq!(event(false, false, true).dispatch(), Dispatch::Error);
    }
}
