//! Byte buffers sitting between a socket and the task that owns it.
//!
//! - [`InBuffer`] frames inbound bytes into messages (fixed length,
//!   delimiter, or anything available).
//! - [`OutQueue`] orders outbound data, applies backpressure and carries the
//!   close request to the writer.

mod in_buffer;
mod out_queue;

pub use in_buffer::{InBuffer, Term};
pub use out_queue::{Chunk, DEFAULT_PRIORITY, OutQueue};
