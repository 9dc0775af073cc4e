use super::command::{Command, Remote};
use super::event::{Dispatch, Event};
use super::poller::Poller;
use super::poller::common::Interest;
use super::timer::{Timer, TimerEntry};
use crate::error::{Error, Result};
use crate::utils::Slab;

use std::cell::{Cell, RefCell};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::{Duration, Instant};

/// Readiness callback stored in a registration.
pub(crate) type Callback = Rc<dyn Fn()>;

/// Timing knobs of a reactor.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ReactorConfig {
    /// Window inside which a timer counts as due.
    pub(crate) allowance: Duration,

    /// Poll timeout used when no timer is pending.
    pub(crate) idle_poll_timeout: Duration,

    /// Readiness events collected per poll.
    pub(crate) max_events: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            allowance: Duration::from_millis(30),
            idle_poll_timeout: Duration::from_secs(3600),
            max_events: 256,
        }
    }
}

/// A descriptor registered with the reactor.
struct Registration {
    fd: RawFd,
    interest: Interest,
    on_read: Callback,
    on_write: Callback,
    on_error: Option<Callback>,
}

/// The reactor.
///
/// The reactor lives on the runtime thread and is responsible for:
/// - polling OS readiness events,
/// - managing timers,
/// - running the callbacks registered for ready descriptors and due timers,
/// - executing work handed over by [`Remote`] handles.
///
/// Every method takes `&self`: callbacks run while the reactor is in the
/// middle of a tick and are free to register descriptors or schedule more
/// timers. No internal borrow is held while a callback runs.
pub struct Reactor {
    config: ReactorConfig,

    /// Platform-specific poller.
    poller: RefCell<Poller>,

    /// Buffer used to collect readiness events from the poller.
    events: RefCell<Vec<Event>>,

    /// Registrations indexed by poller token.
    registrations: RefCell<Slab<Registration>>,

    /// Poller token of each registered descriptor.
    tokens: RefCell<HashMap<RawFd, usize>>,

    /// Min-heap of timers ordered by deadline.
    timers: RefCell<BinaryHeap<TimerEntry>>,

    /// Timers scheduled since the last merge.
    new_timers: RefCell<Vec<TimerEntry>>,

    /// Callbacks deferred to the start of the next tick.
    next_tick: RefCell<Vec<TimerEntry>>,

    /// Sequence number handed to the next timer.
    seq: Cell<u64>,

    /// Cleared by [`stop`](Self::stop); checked after every callback.
    running: Cell<bool>,

    /// Channel receiving commands from remote handles.
    receiver: Receiver<Command>,

    /// Template sender cloned into every remote handle.
    sender: Sender<Command>,

    /// Number of live remote handles.
    remotes: Arc<AtomicUsize>,
}

impl Reactor {
    /// Creates a reactor with the default timer allowance and poll limits.
    pub fn new() -> Result<Self> {
        Self::with_config(ReactorConfig::default())
    }

    pub(crate) fn with_config(config: ReactorConfig) -> Result<Self> {
        let poller = Poller::new(config.max_events)?;
        let (sender, receiver) = channel();

        Ok(Self {
            config,
            poller: RefCell::new(poller),
            events: RefCell::new(Vec::with_capacity(config.max_events)),
            registrations: RefCell::new(Slab::new(64)),
            tokens: RefCell::new(HashMap::new()),
            timers: RefCell::new(BinaryHeap::new()),
            new_timers: RefCell::new(Vec::new()),
            next_tick: RefCell::new(Vec::new()),
            seq: Cell::new(0),
            running: Cell::new(true),
            receiver,
            sender,
            remotes: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Registers `fd` with read interest.
    ///
    /// `on_write` only runs after [`enable_write`](Self::enable_write).
    /// Without an `on_error` handler, bare error conditions go to `on_read`,
    /// which observes the failure on its next read.
    ///
    /// A descriptor can be registered once; a second registration fails
    /// with [`Error::AlreadyRegistered`].
    pub fn register(
        &self,
        fd: RawFd,
        on_read: impl Fn() + 'static,
        on_write: impl Fn() + 'static,
        on_error: Option<Box<dyn Fn()>>,
    ) -> Result<()> {
        if self.tokens.borrow().contains_key(&fd) {
            return Err(Error::AlreadyRegistered(fd));
        }

        let token = self.registrations.borrow_mut().insert(Registration {
            fd,
            interest: Interest::READ,
            on_read: Rc::new(on_read),
            on_write: Rc::new(on_write),
            on_error: on_error.map(Rc::from),
        });

        if let Err(err) = self.poller.borrow().register(fd, token, Interest::READ) {
            self.registrations.borrow_mut().remove(token);
            return Err(err.into());
        }

        self.tokens.borrow_mut().insert(fd, token);
        tracing::trace!(fd, token, "descriptor registered");

        Ok(())
    }

    /// Removes `fd` from the reactor. Unknown descriptors are ignored.
    pub fn unregister(&self, fd: RawFd) {
        let Some(token) = self.tokens.borrow_mut().remove(&fd) else {
            return;
        };

        // Dropping the callbacks may release the last handle on other state;
        // keep the borrow short.
        let registration = self.registrations.borrow_mut().remove(token);

        if let Err(err) = self.poller.borrow().deregister(fd) {
            tracing::warn!(fd, error = %err, "failed to remove descriptor from poller");
        }

        drop(registration);
        tracing::trace!(fd, token, "descriptor unregistered");
    }

    /// Turns write interest on for `fd`.
    pub fn enable_write(&self, fd: RawFd) -> Result<()> {
        self.set_interest(fd, Interest::READ_WRITE)
    }

    /// Turns write interest off for `fd`.
    pub fn disable_write(&self, fd: RawFd) -> Result<()> {
        self.set_interest(fd, Interest::READ)
    }

    fn set_interest(&self, fd: RawFd, interest: Interest) -> Result<()> {
        let Some(token) = self.tokens.borrow().get(&fd).copied() else {
            return Ok(());
        };

        let mut registrations = self.registrations.borrow_mut();
        let Some(registration) = registrations.get_mut(token) else {
            return Ok(());
        };

        if registration.interest == interest {
            return Ok(());
        }

        self.poller
            .borrow()
            .reregister(registration.fd, token, interest)?;
        registration.interest = interest;

        Ok(())
    }

    /// Returns `true` if `fd` currently has a registration.
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.tokens.borrow().contains_key(&fd)
    }

    /// Schedules `f` to run once, `delay` from now.
    ///
    /// The timer joins the queue at the next merge point, so a timer created
    /// by a callback never reorders the batch of timers firing in that pass.
    pub fn call_later(&self, delay: Duration, f: impl FnOnce() + 'static) -> Timer {
        let timer = Timer::new(Instant::now() + delay, Box::new(f));
        let entry = self.entry(&timer);
        self.new_timers.borrow_mut().push(entry);
        timer
    }

    /// Schedules `f` for the start of the next tick.
    ///
    /// Unlike a zero-delay [`call_later`](Self::call_later), a deferred
    /// callback never runs during the tick that scheduled it; this is how a
    /// task gives up control without sleeping.
    pub fn defer(&self, f: impl FnOnce() + 'static) -> Timer {
        let timer = Timer::new(Instant::now(), Box::new(f));
        let entry = self.entry(&timer);
        self.next_tick.borrow_mut().push(entry);
        timer
    }

    fn entry(&self, timer: &Timer) -> TimerEntry {
        let seq = self.seq.get();
        self.seq.set(seq.wrapping_add(1));

        TimerEntry {
            deadline: timer.deadline(),
            seq,
            state: timer.state(),
        }
    }

    /// Returns a `Send` handle for scheduling work from other threads.
    pub fn remote(&self) -> Remote {
        Remote::new(
            self.sender.clone(),
            self.poller.borrow().waker(),
            self.remotes.clone(),
        )
    }

    /// Stops the loop; the current tick returns after the running callback.
    pub fn stop(&self) {
        self.running.set(false);
    }

    /// Returns `false` once [`stop`](Self::stop) was called.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Returns `true` when nothing can ever produce another callback:
    /// no registrations, no pending timers and no remote handles.
    ///
    /// Commands left behind by handles that are already gone are moved into
    /// the timer queue first, so they still count as pending work.
    pub fn is_idle(&self) -> bool {
        if self.remotes.load(Ordering::Acquire) != 0 {
            return false;
        }

        // Every send of a dropped handle happens before its count decrement.
        self.drain_commands();

        self.registrations.borrow().is_empty()
            && self.timers.borrow().iter().all(TimerEntry::is_cancelled)
            && self.new_timers.borrow().iter().all(TimerEntry::is_cancelled)
            && self.next_tick.borrow().iter().all(TimerEntry::is_cancelled)
    }

    /// Runs a single pass of event handling.
    ///
    /// 1. Run commands from remote handles and merge newly scheduled timers
    /// 2. Poll, bounded by the earliest timer deadline
    /// 3. Fire due timers
    /// 4. Run one callback per ready descriptor
    /// 5. Keep merging and firing due timers until a pass fires none
    ///
    /// Returns early as soon as a callback stops the reactor.
    pub fn handle_events(&self) -> Result<()> {
        self.drain_commands();
        self.merge_timers();

        if !self.running.get() {
            return Ok(());
        }

        let timeout = self.poll_timeout();
        let events = {
            let mut events = self.events.borrow_mut();
            self.poller.borrow_mut().poll(&mut events, Some(timeout))?;
            events.drain(..).collect::<Vec<_>>()
        };

        // Timers first, to keep their timings tight.
        if self.fire_due_timers() == FireOutcome::Stopped {
            return Ok(());
        }

        for event in events {
            let Some(callback) = self.callback_for(&event) else {
                continue;
            };

            callback();

            if !self.running.get() {
                return Ok(());
            }
        }

        loop {
            self.new_timers_into_heap();

            match self.fire_due_timers() {
                FireOutcome::Stopped => return Ok(()),
                FireOutcome::Fired(0) => break,
                FireOutcome::Fired(_) => {}
            }
        }

        Ok(())
    }

    fn drain_commands(&self) {
        while let Ok(cmd) = self.receiver.try_recv() {
            match cmd {
                Command::Schedule(f) => {
                    self.call_later(Duration::ZERO, f);
                }
                Command::Halt => {
                    tracing::debug!("halt requested by remote handle");
                    self.stop();
                }
            }
        }
    }

    fn merge_timers(&self) {
        let deferred = std::mem::take(&mut *self.next_tick.borrow_mut());
        self.timers.borrow_mut().extend(deferred);
        self.new_timers_into_heap();
    }

    fn new_timers_into_heap(&self) {
        let new = std::mem::take(&mut *self.new_timers.borrow_mut());
        self.timers.borrow_mut().extend(new);
    }

    fn poll_timeout(&self) -> Duration {
        let mut timers = self.timers.borrow_mut();

        // Cancelled timers at the front would only cause empty wake-ups.
        while timers.peek().is_some_and(TimerEntry::is_cancelled) {
            timers.pop();
        }

        timers
            .peek()
            .map(|t| t.deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(self.config.idle_poll_timeout)
    }

    fn fire_due_timers(&self) -> FireOutcome {
        let mut fired = 0;

        loop {
            let now = Instant::now();
            let entry = {
                let mut timers = self.timers.borrow_mut();
                match timers.peek() {
                    Some(t) if t.is_due(now, self.config.allowance) => timers.pop(),
                    _ => None,
                }
            };

            let Some(entry) = entry else {
                return FireOutcome::Fired(fired);
            };

            let Some(callback) = entry.state.take() else {
                continue;
            };

            callback();
            fired += 1;

            if !self.running.get() {
                return FireOutcome::Stopped;
            }
        }
    }

    fn callback_for(&self, event: &Event) -> Option<Callback> {
        let registrations = self.registrations.borrow();
        let registration = registrations.get(event.token)?;

        let callback = match event.dispatch() {
            Dispatch::Read => &registration.on_read,
            Dispatch::Write => &registration.on_write,
            Dispatch::Error => registration
                .on_error
                .as_ref()
                .unwrap_or(&registration.on_read),
        };

        Some(callback.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FireOutcome {
    Fired(usize),
    Stopped,
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("registrations", &self.registrations.borrow().len())
            .field("timers", &self.timers.borrow().len())
            .field("running", &self.running.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Reactor;

    use std::cell::{Cell, RefCell};
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    fn run_until_idle(reactor: &Reactor) {
        while reactor.is_running() && !reactor.is_idle() {
            reactor.handle_events().unwrap();
        }
    }

    #[test]
    fn test_timer_fires_once() {
        let reactor = Reactor::new().unwrap();
        let hits = Rc::new(Cell::new(0));
        let start = Instant::now();
        let fired_at = Rc::new(Cell::new(None));

        let (h, at) = (hits.clone(), fired_at.clone());
        reactor.call_later(Duration::from_millis(50), move || {
            h.set(h.get() + 1);
            at.set(Some(Instant::now()));
        });

        run_until_idle(&reactor);

        assert_eq!(hits.get(), 1);
        let elapsed = fired_at.get().unwrap() - start;
        assert!(elapsed >= Duration::from_millis(20), "fired too early: {elapsed:?}");
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let reactor = Reactor::new().unwrap();
        let timer = reactor.call_later(Duration::from_millis(10), || panic!("cancelled timer ran"));
        timer.cancel();

        run_until_idle(&reactor);
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_zero_delay_chain_completes_in_one_tick() {
        let reactor = Rc::new(Reactor::new().unwrap());
        let hits = Rc::new(Cell::new(0));

        fn chain(reactor: Rc<Reactor>, hits: Rc<Cell<u32>>, left: u32) {
            hits.set(hits.get() + 1);
            if left > 0 {
                let r = reactor.clone();
                reactor.call_later(Duration::ZERO, move || chain(r, hits, left - 1));
            }
        }

        let (r, h) = (reactor.clone(), hits.clone());
        reactor.call_later(Duration::ZERO, move || chain(r, h, 4));
        reactor.handle_events().unwrap();

        assert_eq!(hits.get(), 5);
    }

    #[test]
    fn test_deferred_callback_waits_for_next_tick() {
        let reactor = Rc::new(Reactor::new().unwrap());
        let order = Rc::new(RefCell::new(Vec::new()));

        let (r, o) = (reactor.clone(), order.clone());
        reactor.call_later(Duration::ZERO, move || {
            o.borrow_mut().push("timer");
            let o = o.clone();
            r.defer(move || o.borrow_mut().push("deferred"));
        });

        reactor.handle_events().unwrap();
        assert_eq!(*order.borrow(), vec!["timer"]);

        reactor.handle_events().unwrap();
        assert_eq!(*order.borrow(), vec!["timer", "deferred"]);
    }

    #[test]
    fn test_stop_interrupts_tick() {
        let reactor = Rc::new(Reactor::new().unwrap());
        let r = reactor.clone();
        reactor.call_later(Duration::ZERO, move || r.stop());
        reactor.call_later(Duration::ZERO, || panic!("ran after stop"));

        reactor.handle_events().unwrap();
        assert!(!reactor.is_running());
    }

    #[test]
    fn test_read_callback_and_duplicate_registration() {
        let reactor = Reactor::new().unwrap();
        let (mut left, right) = UnixStream::pair().unwrap();
        right.set_nonblocking(true).unwrap();

        let reads = Rc::new(Cell::new(0));
        let r = reads.clone();
        reactor
            .register(right.as_raw_fd(), move || r.set(r.get() + 1), || {}, None)
            .unwrap();

        let again = reactor.register(right.as_raw_fd(), || {}, || {}, None);
        assert!(matches!(again, Err(crate::Error::AlreadyRegistered(_))));

        left.write_all(b"ping").unwrap();
        reactor.handle_events().unwrap();
        assert_eq!(reads.get(), 1);

        reactor.unregister(right.as_raw_fd());
        reactor.unregister(right.as_raw_fd());
        assert!(reactor.is_idle());
    }

    #[test]
    fn test_write_interest_toggles() {
        let reactor = Reactor::new().unwrap();
        let (_left, right) = UnixStream::pair().unwrap();
        let fd = right.as_raw_fd();

        let writes = Rc::new(Cell::new(0));
        let w = writes.clone();
        reactor.register(fd, || {}, move || w.set(w.get() + 1), None).unwrap();

        reactor.call_later(Duration::from_millis(5), || {});
        reactor.handle_events().unwrap();
        assert_eq!(writes.get(), 0);

        reactor.enable_write(fd).unwrap();
        reactor.handle_events().unwrap();
        assert_eq!(writes.get(), 1);

        reactor.disable_write(fd).unwrap();
        reactor.call_later(Duration::from_millis(5), || {});
        reactor.handle_events().unwrap();
        assert_eq!(writes.get(), 1);

        reactor.unregister(fd);
    }

    #[test]
    fn test_remote_schedule_from_thread() {
        let reactor = Reactor::new().unwrap();
        let remote = reactor.remote();
        assert!(!reactor.is_idle());

        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        std::thread::spawn(move || {
            remote
                .schedule(move || flag.store(true, Ordering::Release))
                .unwrap();
        })
        .join()
        .unwrap();

        while !done.load(Ordering::Acquire) {
            reactor.handle_events().unwrap();
        }
        assert!(reactor.is_idle());
    }

    #[test]
    fn test_remote_dropped_after_schedule_still_runs() {
        let reactor = Reactor::new().unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let remote = reactor.remote();
        let flag = done.clone();
        std::thread::spawn(move || {
            remote
                .schedule(move || flag.store(true, Ordering::Release))
                .unwrap();
            drop(remote);
        })
        .join()
        .unwrap();

        assert!(!reactor.is_idle());
        run_until_idle(&reactor);
        assert!(done.load(Ordering::Acquire));
    }

    #[test]
    fn test_remote_halt() {
        let reactor = Reactor::new().unwrap();
        reactor.remote().halt().unwrap();

        reactor.handle_events().unwrap();
        assert!(!reactor.is_running());
    }
}
