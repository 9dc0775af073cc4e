use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub(crate) type TimerCallback = Box<dyn FnOnce()>;

/// Shared state of a scheduled timer.
pub(crate) struct TimerState {
    deadline: Instant,
    pending: Cell<bool>,
    callback: RefCell<Option<TimerCallback>>,
}

impl TimerState {
    /// Takes the callback if the timer has not fired or been cancelled yet.
    ///
    /// A timer yields its callback at most once.
    pub(crate) fn take(&self) -> Option<TimerCallback> {
        if !self.pending.replace(false) {
            return None;
        }

        self.callback.borrow_mut().take()
    }
}

/// Handle to a callback scheduled with [`Reactor::call_later`](crate::Reactor::call_later).
///
/// Dropping the handle does not cancel the timer.
#[derive(Clone)]
pub struct Timer {
    state: Rc<TimerState>,
}

impl Timer {
    pub(crate) fn new(deadline: Instant, callback: TimerCallback) -> Self {
        Self {
            state: Rc::new(TimerState {
                deadline,
                pending: Cell::new(true),
                callback: RefCell::new(Some(callback)),
            }),
        }
    }

    /// Prevents the callback from running.
    ///
    /// Cancelling a timer that already fired has no effect.
    pub fn cancel(&self) {
        self.state.pending.set(false);
        // Release captured state right away instead of when the entry is popped.
        self.state.callback.borrow_mut().take();
    }

    /// Returns `true` while the timer has neither fired nor been cancelled.
    pub fn is_pending(&self) -> bool {
        self.state.pending.get()
    }

    /// The instant the timer was scheduled for.
    pub fn deadline(&self) -> Instant {
        self.state.deadline
    }

    pub(crate) fn state(&self) -> Rc<TimerState> {
        self.state.clone()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("deadline", &self.state.deadline)
            .field("pending", &self.state.pending.get())
            .finish()
    }
}

/// An entry in the reactor timer queue.
///
/// `TimerEntry` is stored inside a binary heap ordered by deadline, then by
/// scheduling order, so timers sharing a deadline fire first-in first-out.
pub(crate) struct TimerEntry {
    /// The time at which the timer should fire.
    pub(crate) deadline: Instant,

    /// Scheduling sequence number.
    pub(crate) seq: u64,

    /// State shared with the [`Timer`] handle.
    pub(crate) state: Rc<TimerState>,
}

impl TimerEntry {
    /// A timer is due once its deadline is closer than `allowance`.
    ///
    /// The allowance batches near-simultaneous timers into one pass and
    /// tolerates a poll that returns slightly early.
    pub(crate) fn is_due(&self, now: Instant, allowance: Duration) -> bool {
        self.deadline <= now || self.deadline - now < allowance
    }

    /// Returns `true` if the timer was cancelled before being popped.
    pub(crate) fn is_cancelled(&self) -> bool {
        !self.state.pending.get()
    }
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Orders timer entries by deadline.
    ///
    /// Note that the comparison is **reversed** so that a
    /// `BinaryHeap<TimerEntry>` behaves as a min-heap,
    /// where the earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
