use crate::task::{Computation, Key, Resume, Step, Token, from_fn};

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LOCK: AtomicU64 = AtomicU64::new(0);

struct State {
    /// Permits still available.
    count: Cell<usize>,

    /// Private rendezvous key fired on every release.
    key: Key,
}

/// A counting lock for tasks.
///
/// `acquire` waits while no permit is left; `release` hands one back and
/// wakes every waiter, which then race for it in wake order. Losers wait
/// again.
///
/// ```rust,ignore
/// let lock = Lock::new(1);
/// // inside a computation:
/// Step::call(lock.acquire())
/// // ... critical section ...
/// Step::call(lock.release())
/// ```
#[derive(Clone)]
pub struct Lock {
    state: Rc<State>,
}

impl Lock {
    /// Creates a lock with `count` permits.
    pub fn new(count: usize) -> Self {
        let id = NEXT_LOCK.fetch_add(1, Ordering::Relaxed);

        Self {
            state: Rc::new(State {
                count: Cell::new(count),
                key: Key::from(format!("spindle.lock.{id}")),
            }),
        }
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.state.count.get()
    }

    /// Takes a permit if one is free, without suspending.
    pub fn try_acquire(&self) -> bool {
        let count = self.state.count.get();
        if count == 0 {
            return false;
        }
        self.state.count.set(count - 1);
        true
    }

    /// Computation completing once a permit was taken.
    pub fn acquire(&self) -> impl Computation {
        let lock = self.clone();

        from_fn(move |input| {
            if let Resume::Signal(signal) = input {
                return Step::Raise(signal);
            }
            if lock.try_acquire() {
                return Step::done(());
            }
            Token::Wait(lock.state.key.clone()).into()
        })
    }

    /// Computation returning a permit and waking the waiters.
    pub fn release(&self) -> impl Computation {
        let lock = self.clone();
        let mut released = false;

        from_fn(move |_| {
            if released {
                return Step::done(());
            }
            released = true;

            let state = &lock.state;
            state.count.set(state.count.get() + 1);
            Token::fire(state.key.clone(), ()).into()
        })
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("available", &self.available())
            .field("key", &self.state.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Lock;

    #[test]
    fn test_try_acquire_counts_down() {
        let lock = Lock::new(2);

        assert!(lock.try_acquire());
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        assert_eq!(lock.available(), 0);
    }

    #[test]
    fn test_locks_use_distinct_keys() {
        let a = Lock::new(1);
        let b = Lock::new(1);

        assert_ne!(a.state.key, b.state.key);
    }
}
