//! Coordination between tasks.
//!
//! Built entirely on the wait/fire rendezvous: a task that cannot proceed
//! waits on a private key and is fired when the resource frees up. No OS
//! primitive is involved, so these types are neither `Send` nor `Sync`.

mod lock;

pub use lock::Lock;
