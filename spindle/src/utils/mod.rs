//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the runtime.
//! In particular, it exposes a [`Slab`] allocator used by the reactor to
//! hand out poller tokens for registrations and to reuse freed slots.

mod slab;

pub(crate) use slab::Slab;
