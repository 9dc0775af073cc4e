use std::os::fd::RawFd;

/// Readiness interest of a registered descriptor.
///
/// Read interest is always on for reactor registrations; write interest
/// is switched on only while there is something to send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
    };

    pub(crate) const READ_WRITE: Interest = Interest {
        read: true,
        write: true,
    };
}

/// Cross-thread wake handle for a blocked poll.
///
/// Owns the wake descriptor and closes it once the last handle is gone.
pub(crate) struct Waker(pub(crate) RawFd);

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}
