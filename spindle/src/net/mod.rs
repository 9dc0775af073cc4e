//! Sockets bound to tasks.
//!
//! A [`Service`] listens and accepts; every accepted socket becomes a
//! connection whose owner task reads and writes only through tokens.
//! Already connected sockets, TLS-wrapped ones included, join the runtime
//! through [`Runtime::spawn_connection`](crate::Runtime::spawn_connection).

mod connection;
mod service;

pub(crate) use connection::{Connection, attach, close_after_flush, shutdown, want_write};
pub(crate) use service::listen;

pub use connection::{ConnectionState, Socket};
pub use service::Service;
