//! A task bound to a socket.
//!
//! The connection owns the socket together with its [`InBuffer`] and
//! [`OutQueue`]. Reactor callbacks move bytes between the socket and the
//! buffers; the owning task only ever talks to the buffers through tokens.

use crate::error::{Error, Result};
use crate::io::{InBuffer, OutQueue};
use crate::runtime::core::Inner;
use crate::task::TaskId;

use bytes::{Bytes, BytesMut};

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};

/// Anything a connection can be built around.
///
/// Plain TCP streams qualify, and so does any wrapper (TLS, for one) that
/// exposes non-blocking `Read`/`Write` over a pollable descriptor.
pub trait Socket: Read + Write + AsRawFd {}

impl<T: Read + Write + AsRawFd> Socket for T {}

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered for reads only; nothing to send.
    ReadOnly,

    /// Out queue holds data, write interest is on.
    ReadWrite,

    /// Being torn down.
    ShuttingDown,

    /// Socket closed and registrations removed.
    Closed,
}

/// Result of one bounded socket read.
enum Fill {
    Data(Bytes),
    Blocked,
    Eof,
    Failed(io::Error),
}

/// Result of one bounded socket write.
enum Flush {
    /// More to send; keep write interest.
    Pending,

    /// Queue is empty; write interest can go.
    Drained,

    /// Queue is empty and a close was requested.
    Close,

    Failed(Error),
}

pub(crate) struct Connection {
    socket: Option<Box<dyn Socket>>,
    fd: RawFd,
    owner: TaskId,
    state: ConnectionState,
    pub(crate) input: InBuffer,
    pub(crate) output: OutQueue,
}

impl Connection {
    pub(crate) fn new(socket: Box<dyn Socket>, owner: TaskId, limit: Option<usize>) -> Self {
        let fd = socket.as_raw_fd();
        let mut output = OutQueue::new();
        output.set_limit(limit);

        Self {
            socket: Some(socket),
            fd,
            owner,
            state: ConnectionState::ReadOnly,
            input: InBuffer::new(),
            output,
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::ReadOnly | ConnectionState::ReadWrite
        )
    }

    fn fill(&mut self, max: usize) -> Fill {
        let Some(socket) = self.socket.as_mut() else {
            return Fill::Eof;
        };

        let mut buffer = BytesMut::zeroed(max);

        loop {
            match socket.read(&mut buffer) {
                Ok(0) => return Fill::Eof,
                Ok(n) => {
                    buffer.truncate(n);
                    return Fill::Data(buffer.freeze());
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if Error::is_transient(&err) => return Fill::Blocked,
                Err(err) => return Fill::Failed(err),
            }
        }
    }

    fn flush(&mut self, max: usize) -> Flush {
        let data = match self.output.read(max) {
            Ok(data) => data,
            Err(Error::CloseRequested) => return Flush::Close,
            Err(err) => return Flush::Failed(err),
        };

        if data.is_empty() {
            return Flush::Drained;
        }

        let Some(socket) = self.socket.as_mut() else {
            return Flush::Close;
        };

        let written = loop {
            match socket.write(&data) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if Error::is_transient(&err) => break 0,
                Err(err) => return Flush::Failed(err.into()),
            }
        };

        if written < data.len() {
            self.output.backup(data.slice(written..));
        }

        if self.output.wants_write() {
            Flush::Pending
        } else {
            Flush::Drained
        }
    }

    /// Drops the socket, closing the descriptor.
    fn close(&mut self) {
        self.socket = None;
        self.state = ConnectionState::Closed;
    }
}

/// Registers the connection's descriptor with the reactor.
pub(crate) fn attach(inner: &Inner, connection: &Rc<RefCell<Connection>>) -> Result<()> {
    let fd = connection.borrow().fd();
    let weak = inner.downgrade();

    let (runtime, conn) = (weak.clone(), connection.clone());
    let on_read = move || on_readable(&runtime, &conn);

    let (runtime, conn) = (weak.clone(), connection.clone());
    let on_write = move || on_writable(&runtime, &conn);

    let (runtime, conn) = (weak, connection.clone());
    let on_error = move || {
        if let Some(inner) = runtime.upgrade() {
            tracing::debug!(fd, "socket reported an error condition");
            shutdown(&inner, &conn, true);
        }
    };

    inner
        .reactor
        .register(fd, on_read, on_write, Some(Box::new(on_error)))
}

/// Queues a close behind any pending output.
///
/// The connection is torn down once the out queue has drained.
pub(crate) fn close_after_flush(inner: &Inner, connection: &RefCell<Connection>) {
    let fd = {
        let mut conn = connection.borrow_mut();
        if !conn.is_open() {
            return;
        }
        conn.output.close_request();
        conn.state = ConnectionState::ReadWrite;
        conn.fd()
    };

    if let Err(err) = inner.reactor.enable_write(fd) {
        tracing::warn!(fd, error = %err, "failed to enable write interest");
        shutdown(inner, connection, false);
    }
}

/// Turns write interest on after the owner queued data.
pub(crate) fn want_write(inner: &Inner, connection: &RefCell<Connection>) -> Result<()> {
    let fd = {
        let mut conn = connection.borrow_mut();
        conn.state = ConnectionState::ReadWrite;
        conn.fd()
    };

    inner.reactor.enable_write(fd)
}

/// Tears the connection down: unregister, close the socket.
///
/// With `remote` set the owner is told through a `ConnectionClosed` signal
/// if it is waiting on the connection.
pub(crate) fn shutdown(inner: &Inner, connection: &RefCell<Connection>, remote: bool) {
    let (fd, owner) = {
        let mut conn = connection.borrow_mut();
        if matches!(
            conn.state,
            ConnectionState::ShuttingDown | ConnectionState::Closed
        ) {
            return;
        }
        conn.state = ConnectionState::ShuttingDown;
        (conn.fd(), conn.owner)
    };

    inner.reactor.unregister(fd);
    connection.borrow_mut().close();

    tracing::debug!(fd, task = %owner, remote, "connection closed");

    if remote {
        inner.connection_lost(owner);
    }
}

fn on_readable(runtime: &Weak<Inner>, connection: &Rc<RefCell<Connection>>) {
    let Some(inner) = runtime.upgrade() else {
        return;
    };

    let (owner, fill) = {
        let mut conn = connection.borrow_mut();
        if !conn.is_open() {
            return;
        }
        (conn.owner, conn.fill(inner.config.read_chunk))
    };

    match fill {
        Fill::Blocked => {}
        Fill::Data(bytes) => {
            let message = connection.borrow_mut().input.feed(bytes);
            if let Some(message) = message {
                inner.deliver_read(owner, message);
            }
        }
        Fill::Eof => shutdown(&inner, connection, true),
        Fill::Failed(err) => {
            tracing::debug!(task = %owner, error = %err, "socket read failed");
            shutdown(&inner, connection, true);
        }
    }
}

fn on_writable(runtime: &Weak<Inner>, connection: &Rc<RefCell<Connection>>) {
    let Some(inner) = runtime.upgrade() else {
        return;
    };

    let (fd, flush) = {
        let mut conn = connection.borrow_mut();
        (conn.fd(), conn.flush(inner.config.write_chunk))
    };

    match flush {
        Flush::Pending => {}
        Flush::Drained => {
            connection.borrow_mut().state = ConnectionState::ReadOnly;
            if let Err(err) = inner.reactor.disable_write(fd) {
                tracing::warn!(fd, error = %err, "failed to disable write interest");
            }
        }
        Flush::Close => shutdown(&inner, connection, false),
        Flush::Failed(err) => {
            tracing::debug!(fd, error = %err, "socket write failed");
            shutdown(&inner, connection, true);
        }
    }
}
