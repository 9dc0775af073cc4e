use crate::error::Result;
use crate::reactor::poller::platform::{
    socketaddr_to_storage, sys_accept, sys_bind, sys_close, sys_ipv6_is_necessary, sys_listen,
    sys_set_reuseaddr, sys_socket, sys_sockname,
};
use crate::runtime::core::Inner;
use crate::task::Computation;

use libc::{AF_INET, AF_INET6, c_int};

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{FromRawFd, RawFd};
use std::rc::{Rc, Weak};

type Handler = Box<dyn Fn(SocketAddr) -> Box<dyn Computation>>;

/// A listening TCP endpoint.
///
/// Every accepted socket becomes a connection task whose root computation
/// is produced by the handler for the peer address.
///
/// # Examples
///
/// ```rust,ignore
/// let service = Service::new(addr, |_peer| echo())
///     .label("echo")
///     .backlog(512);
/// let bound = runtime.add_service(service)?;
/// ```
pub struct Service {
    addr: SocketAddr,
    handler: Handler,
    label: Option<String>,
    backlog: c_int,
}

impl Service {
    pub fn new<C, F>(addr: SocketAddr, handler: F) -> Self
    where
        C: Computation,
        F: Fn(SocketAddr) -> C + 'static,
    {
        Self {
            addr,
            handler: Box::new(move |peer| Box::new(handler(peer))),
            label: None,
            backlog: 128,
        }
    }

    /// Label given to every connection task of this service.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Listen backlog (default 128).
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.min(c_int::MAX as u32) as c_int;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("addr", &self.addr)
            .field("label", &self.label)
            .field("backlog", &self.backlog)
            .finish()
    }
}

/// File descriptor of the listening socket, closed on drop.
struct Listener {
    fd: RawFd,
}

impl Listener {
    /// Binds and listens synchronously; errors surface to the caller.
    ///
    /// This:
    /// - creates a non-blocking socket,
    /// - enables `SO_REUSEADDR`,
    /// - configures IPv6 dual-stack if applicable,
    /// - binds and starts listening.
    fn bind(addr: &SocketAddr, backlog: c_int) -> io::Result<Self> {
        let (storage, len) = socketaddr_to_storage(addr);
        let domain = match addr {
            SocketAddr::V4(_) => AF_INET,
            SocketAddr::V6(_) => AF_INET6,
        };

        let listener = Self {
            fd: sys_socket(domain)?,
        };

        sys_set_reuseaddr(listener.fd)?;
        sys_ipv6_is_necessary(listener.fd, domain)?;
        sys_bind(listener.fd, &storage, len)?;
        sys_listen(listener.fd, backlog)?;

        Ok(listener)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.fd)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}

/// Binds the service and registers its accept loop with the reactor.
///
/// Returns the bound address, which differs from the requested one when
/// port 0 was asked for.
pub(crate) fn listen(inner: &Inner, service: Service) -> Result<SocketAddr> {
    let listener = Listener::bind(&service.addr, service.backlog)?;
    let bound = listener.local_addr()?;
    let fd = listener.fd;

    let service = Rc::new(service);
    let weak = inner.downgrade();

    let (runtime, svc) = (weak.clone(), service.clone());
    let on_read = move || accept_all(&runtime, &listener, &svc);

    let runtime = weak;
    let on_error = move || {
        tracing::error!(fd, "listening socket reported an error, halting");
        if let Some(inner) = runtime.upgrade() {
            inner.reactor.stop();
        }
    };

    inner
        .reactor
        .register(fd, on_read, || {}, Some(Box::new(on_error)))?;

    tracing::info!(addr = %bound, label = service.label.as_deref().unwrap_or("-"), "service listening");

    Ok(bound)
}

fn accept_all(runtime: &Weak<Inner>, listener: &Listener, service: &Service) {
    let Some(inner) = runtime.upgrade() else {
        return;
    };

    loop {
        let (fd, peer) = match sys_accept(listener.fd) {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                return;
            }
        };

        // The accepted descriptor is owned by the stream from here on.
        let stream = unsafe { TcpStream::from_raw_fd(fd) };
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %err, "failed to set TCP_NODELAY");
        }

        let root = (service.handler)(peer);
        match inner.spawn_connection(Box::new(stream), root, service.label.clone()) {
            Ok(id) => tracing::debug!(%peer, task = %id, "connection accepted"),
            Err(err) => tracing::warn!(%peer, error = %err, "failed to start connection"),
        }
    }
}
