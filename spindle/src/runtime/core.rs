use super::builder::{RuntimeBuilder, RuntimeConfig};
use super::context;
use super::task::core::{
    Driver, FirstArms, Flow, Frame, Job, Outcome, Pending, Reply, Restart, Task, TaskId,
};
use super::task::{Alt, Computation, Key, Resume, Signal, Token, Value};
use super::waits::WaitRegistry;
use crate::error::{Error, Result};
use crate::net::{self, Connection, ConnectionState, Service, Socket};
use crate::reactor::poller::platform::sys_set_nonblocking;
use crate::reactor::{Reactor, Remote, Timer};

use bytes::Bytes;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Why a parked task is being resumed.
enum Wake {
    Resume(Resume),

    /// A job arrived in the inbox of a task parked on `Serve`.
    Serve,
}

/// State shared by the runtime handle, reactor callbacks and connections.
///
/// A task is taken out of `tasks` while it is driven, so every borrow of
/// the map is short and never spans a call into user code.
pub(crate) struct Inner {
    pub(crate) reactor: Reactor,
    pub(crate) config: RuntimeConfig,

    tasks: RefCell<HashMap<TaskId, Task>>,

    /// Task currently inside the trampoline.
    running_task: Cell<Option<TaskId>>,

    next_id: Cell<u64>,
    waits: RefCell<WaitRegistry>,

    /// Self handle captured by reactor callbacks.
    weak: Weak<Inner>,
}

impl Inner {
    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        self.weak.clone()
    }

    fn next_task_id(&self) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        TaskId::new(id)
    }

    fn spawn_task(
        &self,
        label: Option<String>,
        root: Box<dyn Computation>,
        restart: Option<Restart>,
    ) -> TaskId {
        let mut task = Task::new(self.next_task_id(), label, root);
        task.restart = restart;
        self.start(task)
    }

    /// Wraps `socket` into a connection owned by a new task running `root`.
    pub(crate) fn spawn_connection(
        &self,
        socket: Box<dyn Socket>,
        root: Box<dyn Computation>,
        label: Option<String>,
    ) -> Result<TaskId> {
        sys_set_nonblocking(socket.as_raw_fd())?;

        let id = self.next_task_id();
        let connection = Rc::new(RefCell::new(Connection::new(
            socket,
            id,
            self.config.out_queue_limit,
        )));
        net::attach(self, &connection)?;

        let mut task = Task::new(id, label, root);
        task.connection = Some(connection);

        Ok(self.start(task))
    }

    /// Stores a fresh task and schedules its first run for this tick.
    fn start(&self, task: Task) -> TaskId {
        let (id, epoch) = (task.id, task.epoch);
        tracing::trace!(task = %id, label = task.label(), "task spawned");

        self.tasks.borrow_mut().insert(id, task);
        self.schedule_wake(id, epoch, Resume::Start);

        id
    }

    fn schedule(&self, id: TaskId, epoch: u64, wake: Wake) -> Timer {
        let runtime = self.weak.clone();
        self.reactor.call_later(Duration::ZERO, move || {
            if let Some(inner) = runtime.upgrade() {
                inner.wake(id, epoch, wake);
            }
        })
    }

    /// Resumes task `id` with `input` later in the current tick, provided it
    /// is still parked at `epoch`.
    pub(crate) fn schedule_wake(&self, id: TaskId, epoch: u64, input: Resume) {
        self.schedule(id, epoch, Wake::Resume(input));
    }

    fn schedule_serve(&self, id: TaskId, epoch: u64) {
        self.schedule(id, epoch, Wake::Serve);
    }

    /// Timer resuming a sleeping task. Zero waits for the next tick.
    fn wake_after(&self, id: TaskId, epoch: u64, delay: Duration, input: Resume) -> Timer {
        let runtime = self.weak.clone();
        let wake = move || {
            if let Some(inner) = runtime.upgrade() {
                inner.wake(id, epoch, Wake::Resume(input));
            }
        };

        if delay.is_zero() {
            self.reactor.defer(wake)
        } else {
            self.reactor.call_later(delay, wake)
        }
    }

    /// Takes a parked task out of the map and clears whatever it waited on.
    ///
    /// Returns `None` for unknown tasks and for wakes from an older epoch.
    fn unpark(&self, id: TaskId, epoch: Option<u64>) -> Option<Task> {
        let mut task = {
            let mut tasks = self.tasks.borrow_mut();
            let task = tasks.get(&id)?;
            if !task.is_parked() || epoch.is_some_and(|epoch| epoch != task.epoch) {
                return None;
            }
            tasks.remove(&id)?
        };

        if matches!(task.clear_pending(), Pending::Wait | Pending::First(_)) {
            self.waits.borrow_mut().remove_task(id);
        }

        Some(task)
    }

    fn wake(&self, id: TaskId, epoch: u64, wake: Wake) {
        let Some(mut task) = self.unpark(id, Some(epoch)) else {
            tracing::trace!(task = %id, epoch, "stale wake ignored");
            return;
        };

        let input = match wake {
            Wake::Resume(input) => input,
            Wake::Serve => match task.inbox.pop_front() {
                Some(job) => {
                    task.push(Frame::job(job));
                    Resume::Start
                }
                None => {
                    task.park(Pending::Serve);
                    self.tasks.borrow_mut().insert(id, task);
                    return;
                }
            },
        };

        self.drive(task, input);
    }

    fn drive(&self, mut task: Task, input: Resume) {
        let id = task.id;

        let previous = self.running_task.replace(Some(id));
        let outcome = task.advance(input, self);
        self.running_task.set(previous);

        match outcome {
            Outcome::Parked => {
                tracing::trace!(task = %id, pending = ?task.pending, "task parked");
                self.tasks.borrow_mut().insert(id, task);
            }
            Outcome::Finished(value) => self.finish(task, Ok(value)),
            Outcome::Failed(signal) => self.finish(task, Err(signal)),
        }
    }

    fn finish(&self, mut task: Task, result: Result<Value, Signal>) {
        let id = task.id;

        match &result {
            Ok(value) => tracing::debug!(task = %id, label = task.label(), ?value, "task finished"),
            Err(signal) if signal.is_connection_closed() => {
                tracing::debug!(task = %id, label = task.label(), %signal, "task ended by closed connection");
            }
            Err(signal) => tracing::error!(task = %id, label = task.label(), %signal, "task failed"),
        }

        self.waits.borrow_mut().remove_task(id);

        for job in task.inbox.drain(..) {
            if let Some(reply) = job.reply {
                let err = Error::CallFailed {
                    task: id,
                    reason: "task exited".into(),
                };
                self.schedule_wake(reply.caller, reply.epoch, Resume::Signal(err.into()));
            }
        }

        if let Some(connection) = task.connection.take() {
            match result {
                Ok(_) => net::close_after_flush(self, &connection),
                Err(_) => net::shutdown(self, &connection, false),
            }
        }

        if let Some(restart) = task.restart.take() {
            let delay = self.config.keep_alive_delay;
            tracing::warn!(task = %id, label = task.label(), ?delay, "keep-alive task exited, restarting");

            let runtime = self.weak.clone();
            let label = task.label.take();
            self.reactor.call_later(delay, move || {
                if let Some(inner) = runtime.upgrade() {
                    let root = restart();
                    inner.spawn_task(label, root, Some(restart));
                }
            });
        }
    }

    /// Resumes every current waiter of `key` during this tick.
    pub(crate) fn fire(&self, key: &Key, value: Value) {
        let waiters = self.waits.borrow_mut().fire(key);
        tracing::trace!(%key, waiters = waiters.len(), "key fired");

        let tasks = self.tasks.borrow();
        for id in waiters {
            let Some(task) = tasks.get(&id) else {
                continue;
            };

            let input = match &task.pending {
                Pending::Wait => value.clone(),
                Pending::First(arms) => {
                    let Some((_, index)) = arms.waits.iter().find(|(k, _)| k == key) else {
                        continue;
                    };
                    Value::Picked {
                        index: *index,
                        value: Box::new(value.clone()),
                    }
                }
                _ => continue,
            };

            self.schedule_wake(id, task.epoch, Resume::Value(input));
        }
    }

    /// Hands a framed message to the connection owner parked on a read.
    pub(crate) fn deliver_read(&self, owner: TaskId, message: Bytes) {
        let value = match self.tasks.borrow().get(&owner).map(|task| &task.pending) {
            Some(Pending::Read) => Value::Bytes(message),
            Some(Pending::First(FirstArms {
                read: Some(index), ..
            })) => Value::Picked {
                index: *index,
                value: Box::new(Value::Bytes(message)),
            },
            _ => {
                tracing::warn!(task = %owner, len = message.len(), "framed message without a reader dropped");
                return;
            }
        };

        if let Some(task) = self.unpark(owner, None) {
            self.drive(task, Resume::Value(value));
        }
    }

    /// The owner's connection went away underneath it.
    ///
    /// A task parked on the connection is resumed right away with
    /// [`Signal::ConnectionClosed`]; any other task finds out on its next
    /// read or send.
    pub(crate) fn connection_lost(&self, owner: TaskId) {
        let waiting = self.tasks.borrow().get(&owner).is_some_and(|task| {
            matches!(
                task.pending,
                Pending::Read | Pending::Drain | Pending::First(FirstArms { read: Some(_), .. })
            )
        });

        if !waiting {
            return;
        }

        let Some(task) = self.unpark(owner, None) else {
            return;
        };

        let unread = task
            .connection
            .as_ref()
            .map(|connection| connection.borrow_mut().input.pop())
            .unwrap_or_default();

        self.drive(task, Resume::Signal(Signal::ConnectionClosed { unread }));
    }

    /// Queues `job` on `target` and wakes it if it is parked on `Serve`.
    fn submit(&self, target: TaskId, job: Job) -> Result<()> {
        let serving = {
            let mut tasks = self.tasks.borrow_mut();
            let task = tasks.get_mut(&target).ok_or(Error::NoSuchTask(target))?;
            task.inbox.push_back(job);
            (task.pending == Pending::Serve).then_some(task.epoch)
        };

        if let Some(epoch) = serving {
            self.schedule_serve(target, epoch);
        }

        Ok(())
    }

    fn run_loop(&self) -> Result<()> {
        tracing::info!("runtime started");

        let result = loop {
            if !self.reactor.is_running() {
                break Ok(());
            }

            if self.reactor.is_idle() {
                let parked = self.tasks.borrow().len();
                if parked > 0 {
                    tracing::warn!(parked, "nothing left to wake the remaining tasks");
                }
                break Ok(());
            }

            if let Err(err) = self.reactor.handle_events() {
                tracing::error!(error = %err, "reactor failed");
                break Err(err);
            }
        };

        tracing::info!(tasks = self.tasks.borrow().len(), "runtime stopped");
        result
    }
}

fn fail(err: Error) -> Flow {
    Flow::Resume(Resume::Signal(err.into()))
}

fn closed(connection: &RefCell<Connection>) -> Flow {
    let unread = connection.borrow_mut().input.pop();
    Flow::Resume(Resume::Signal(Signal::ConnectionClosed { unread }))
}

impl Driver for Inner {
    fn handle_token(&self, task: &mut Task, token: Token) -> Flow {
        tracing::trace!(task = %task.id, token = token.name(), "token");

        match token {
            Token::Send { chunk, priority } => {
                let Some(connection) = task.connection.clone() else {
                    return fail(Error::NoConnection(task.id));
                };

                if !connection.borrow().is_open() {
                    return closed(&connection);
                }

                let added = connection
                    .borrow_mut()
                    .output
                    .add_with_priority(chunk, priority);

                match added.and_then(|()| net::want_write(self, &connection)) {
                    Ok(()) => Flow::Resume(Resume::Value(Value::Unit)),
                    Err(err) => fail(err),
                }
            }

            Token::Read(term) => {
                let Some(connection) = task.connection.clone() else {
                    return fail(Error::NoConnection(task.id));
                };

                {
                    let mut conn = connection.borrow_mut();
                    conn.input.set_term(term);

                    if let Some(message) = conn.input.check() {
                        return Flow::Resume(Resume::Value(Value::Bytes(message)));
                    }

                    if !conn.is_open() {
                        conn.input.clear_term();
                        drop(conn);
                        return closed(&connection);
                    }
                }

                task.park(Pending::Read);
                Flow::Park
            }

            Token::Sleep(duration) => {
                let epoch = task.park(Pending::Sleep);
                let timer = self.wake_after(task.id, epoch, duration, Resume::Value(Value::Unit));
                task.wakeup = Some(timer);
                Flow::Park
            }

            Token::Wait(key) => {
                self.waits.borrow_mut().add(key, task.id);
                task.park(Pending::Wait);
                Flow::Park
            }

            Token::Fire(key, value) => {
                self.fire(&key, value);
                Flow::Resume(Resume::Value(Value::Unit))
            }

            Token::Call { target, job } => {
                if target == task.id {
                    return fail(Error::IncompatibleTokens("a task cannot call itself"));
                }

                let reply = Reply {
                    caller: task.id,
                    epoch: task.epoch,
                };
                let job = Job {
                    computation: job,
                    reply: Some(reply),
                };

                match self.submit(target, job) {
                    Ok(()) => {
                        task.park(Pending::Call(target));
                        Flow::Park
                    }
                    Err(err) => fail(err),
                }
            }

            Token::Message { target, job } => {
                let job = Job {
                    computation: job,
                    reply: None,
                };

                if target == task.id {
                    task.inbox.push_back(job);
                    return Flow::Resume(Resume::Value(Value::Unit));
                }

                match self.submit(target, job) {
                    Ok(()) => Flow::Resume(Resume::Value(Value::Unit)),
                    Err(err) => fail(err),
                }
            }

            Token::Serve => match task.inbox.pop_front() {
                Some(job) => Flow::Push(Frame::job(job)),
                None => {
                    task.park(Pending::Serve);
                    Flow::Park
                }
            },

            Token::Respond(value) => match task.take_reply() {
                Some(reply) => {
                    self.job_done(task.id, reply, Ok(value));
                    Flow::Resume(Resume::Value(Value::Unit))
                }
                // Already answered, or a message nobody waits for.
                None if task.in_job() => Flow::Resume(Resume::Value(Value::Unit)),
                None => Flow::Return(value),
            },

            Token::Drain => {
                let Some(connection) = task.connection.clone() else {
                    return fail(Error::NoConnection(task.id));
                };

                if !connection.borrow().is_open() {
                    return closed(&connection);
                }

                if !connection.borrow().output.is_full() {
                    return Flow::Resume(Resume::Value(Value::Unit));
                }

                let (id, epoch) = (task.id, task.park(Pending::Drain));
                let runtime = self.weak.clone();
                connection.borrow_mut().output.on_low_watermark(move || {
                    if let Some(inner) = runtime.upgrade() {
                        inner.schedule_wake(id, epoch, Resume::Value(Value::Unit));
                    }
                });

                Flow::Park
            }

            Token::First(alts) => self.first(task, alts),
        }
    }

    fn job_done(&self, server: TaskId, reply: Reply, result: Result<Value, Signal>) {
        let input = match result {
            Ok(value) => Resume::Value(value),
            Err(signal) => Resume::Signal(
                Error::CallFailed {
                    task: server,
                    reason: signal.to_string(),
                }
                .into(),
            ),
        };

        self.schedule_wake(reply.caller, reply.epoch, input);
    }
}

impl Inner {
    /// Parks on several alternatives at once; the first to resolve wins and
    /// the others are torn down before the task runs again.
    fn first(&self, task: &mut Task, alts: Vec<Alt>) -> Flow {
        if alts.is_empty() {
            return fail(Error::IncompatibleTokens("first needs at least one alternative"));
        }

        let mut arms = FirstArms::default();
        let mut read = None;
        let mut sleep = None;

        for (index, alt) in alts.into_iter().enumerate() {
            match alt {
                Alt::Read(term) => {
                    if read.replace((index, term)).is_some() {
                        return fail(Error::IncompatibleTokens("first accepts a single read"));
                    }
                }
                Alt::Sleep(duration) => {
                    if sleep.replace((index, duration)).is_some() {
                        return fail(Error::IncompatibleTokens("first accepts a single sleep"));
                    }
                }
                Alt::Wait(key) => arms.waits.push((key, index)),
            }
        }

        if let Some((index, term)) = read {
            let Some(connection) = task.connection.clone() else {
                return fail(Error::NoConnection(task.id));
            };

            let mut conn = connection.borrow_mut();
            conn.input.set_term(term);

            if let Some(message) = conn.input.check() {
                return Flow::Resume(Resume::Value(Value::Picked {
                    index,
                    value: Box::new(Value::Bytes(message)),
                }));
            }

            if !conn.is_open() {
                conn.input.clear_term();
                drop(conn);
                return closed(&connection);
            }

            arms.read = Some(index);
        }

        {
            let mut waits = self.waits.borrow_mut();
            for (key, _) in &arms.waits {
                waits.add(key.clone(), task.id);
            }
        }

        let epoch = task.park(Pending::First(arms));

        if let Some((index, duration)) = sleep {
            let input = Resume::Value(Value::Picked {
                index,
                value: Box::new(Value::Unit),
            });
            task.wakeup = Some(self.wake_after(task.id, epoch, duration, input));
        }

        Flow::Park
    }
}

/// Handle to a single-threaded cooperative runtime.
///
/// The runtime owns the reactor and every task. Handles are cheap to clone
/// and stay on the thread that created them.
///
/// # Examples
///
/// ```rust,ignore
/// let runtime = Runtime::new()?;
/// runtime.spawn(from_fn(|_| Step::done("hello")));
/// runtime.run()?;
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    pub fn new() -> Result<Self> {
        RuntimeBuilder::new().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn with_config(config: RuntimeConfig) -> Result<Self> {
        let reactor = Reactor::with_config(config.reactor)?;

        let inner = Rc::new_cyclic(|weak| Inner {
            reactor,
            config,
            tasks: RefCell::new(HashMap::new()),
            running_task: Cell::new(None),
            next_id: Cell::new(1),
            waits: RefCell::new(WaitRegistry::default()),
            weak: weak.clone(),
        });

        Ok(Self { inner })
    }

    /// Returns the runtime driving the current thread.
    ///
    /// # Panics
    ///
    /// Panics if called outside of [`run`](Self::run).
    pub fn current() -> Self {
        Self::try_current().expect("Runtime::current() called outside of a running runtime")
    }

    pub fn try_current() -> Option<Self> {
        context::current().map(|inner| Self { inner })
    }

    pub fn reactor(&self) -> &Reactor {
        &self.inner.reactor
    }

    /// Schedules a task running `root`. It starts during the next tick.
    pub fn spawn(&self, root: impl Computation) -> TaskId {
        self.inner.spawn_task(None, Box::new(root), None)
    }

    pub fn spawn_labeled(&self, label: impl Into<String>, root: impl Computation) -> TaskId {
        self.inner.spawn_task(Some(label.into()), Box::new(root), None)
    }

    /// Schedules a task that is restarted from `factory` whenever it exits.
    ///
    /// Each restart runs as a new task after the keep-alive delay.
    pub fn spawn_keep_alive<C, F>(&self, label: impl Into<String>, factory: F) -> TaskId
    where
        C: Computation,
        F: Fn() -> C + 'static,
    {
        let restart: Restart = Rc::new(move || Box::new(factory()) as Box<dyn Computation>);
        let root = restart();
        self.inner.spawn_task(Some(label.into()), root, Some(restart))
    }

    /// Builds a connection around an already connected socket.
    ///
    /// The socket is switched to non-blocking mode and `root` runs as its
    /// owner task.
    pub fn spawn_connection(
        &self,
        socket: impl Socket + 'static,
        root: impl Computation,
    ) -> Result<TaskId> {
        self.inner
            .spawn_connection(Box::new(socket), Box::new(root), None)
    }

    /// Binds `service` and starts accepting. Returns the bound address.
    pub fn add_service(&self, service: Service) -> Result<SocketAddr> {
        net::listen(&self.inner, service)
    }

    /// Resumes every task currently waiting on `key`.
    pub fn fire(&self, key: impl Into<Key>, value: impl Into<Value>) {
        self.inner.fire(&key.into(), value.into());
    }

    /// Stops [`run`](Self::run) after the current callback.
    pub fn halt(&self) {
        tracing::debug!("halt requested");
        self.inner.reactor.stop();
    }

    pub fn remote(&self) -> Remote {
        self.inner.reactor.remote()
    }

    /// The task being driven right now, if any.
    pub fn current_task(&self) -> Option<TaskId> {
        self.inner.running_task.get()
    }

    /// State of the connection owned by `task`.
    ///
    /// `None` when the task owns no connection, is gone, or is the one
    /// being driven right now.
    pub fn connection_state(&self, task: TaskId) -> Option<ConnectionState> {
        let tasks = self.inner.tasks.borrow();
        let connection = tasks.get(&task)?.connection.as_ref()?;
        Some(connection.borrow().state())
    }

    /// Number of live tasks, the running one included.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len() + usize::from(self.inner.running_task.get().is_some())
    }

    /// Runs the event loop until [`halt`](Self::halt) is called or nothing
    /// is left that could ever produce work.
    ///
    /// Tasks still parked when the reactor goes idle are abandoned.
    pub fn run(&self) -> Result<()> {
        context::enter_context(&self.inner, || self.inner.run_loop())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("tasks", &self.task_count())
            .field("running", &self.inner.reactor.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Runtime;
    use crate::Error;
    use crate::task::{Alt, Computation, Resume, Signal, Step, TaskId, Token, Value, from_fn, once};

    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    /// Yields `tokens` in order and records what each of them resumed with.
    fn script(tokens: Vec<Token>, results: Rc<RefCell<Vec<Resume>>>) -> impl Computation {
        let mut tokens = tokens.into_iter();
        let mut started = false;
        from_fn(move |input| {
            if started {
                results.borrow_mut().push(input);
            }
            started = true;
            match tokens.next() {
                Some(token) => token.into(),
                None => Step::done(()),
            }
        })
    }

    #[test]
    fn test_spawned_task_runs_to_completion() {
        let runtime = Runtime::new().unwrap();
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        runtime.spawn(from_fn(move |_| {
            flag.set(true);
            Step::done(())
        }));

        assert_eq!(runtime.task_count(), 1);
        runtime.run().unwrap();

        assert!(ran.get());
        assert_eq!(runtime.task_count(), 0);
    }

    #[test]
    fn test_call_and_respond() {
        let runtime = Runtime::new().unwrap();

        let server = runtime.spawn(from_fn(|_| Token::Serve.into()));
        let answer = Rc::new(RefCell::new(None));

        let slot = answer.clone();
        let mut started = false;
        runtime.spawn(from_fn(move |input| {
            if !started {
                started = true;
                return Token::call(server, once(Token::respond(42i64))).into();
            }
            *slot.borrow_mut() = Some(input.into_result().unwrap());
            Step::done(())
        }));

        runtime.run().unwrap();
        assert_eq!(*answer.borrow(), Some(Value::Int(42)));
    }

    #[test]
    fn test_call_to_self_is_rejected() {
        let runtime = Runtime::new().unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));

        // Ids are handed out in spawn order, starting at 1.
        let me = TaskId::new(1);
        let spawned = runtime.spawn(script(vec![Token::call(me, once(Token::yield_now()))], results.clone()));
        assert_eq!(spawned, me);
        runtime.run().unwrap();

        let results = results.borrow();
        assert!(matches!(
            results.as_slice(),
            [Resume::Signal(Signal::Error(Error::IncompatibleTokens(_)))]
        ));
    }

    #[test]
    fn test_call_unknown_task_fails() {
        let runtime = Runtime::new().unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));

        let target = TaskId::new(999);
        runtime.spawn(script(vec![Token::call(target, once(Token::yield_now()))], results.clone()));
        runtime.run().unwrap();

        assert!(matches!(
            results.borrow().as_slice(),
            [Resume::Signal(Signal::Error(Error::NoSuchTask(_)))]
        ));
    }

    #[test]
    fn test_first_wait_beats_sleep() {
        let runtime = Runtime::new().unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));

        runtime.spawn(script(
            vec![Token::first([
                Alt::Sleep(Duration::from_secs(5)),
                Alt::Wait("go".into()),
            ])],
            results.clone(),
        ));
        runtime.spawn(script(
            vec![Token::yield_now(), Token::fire("go", "now")],
            Rc::new(RefCell::new(Vec::new())),
        ));
        runtime.run().unwrap();

        let results = results.borrow();
        match results.as_slice() {
            [Resume::Value(Value::Picked { index, value })] => {
                assert_eq!(*index, 1);
                assert_eq!(**value, Value::from("now"));
            }
            other => panic!("unexpected results {other:?}"),
        }
        // The losing sleep was cancelled, so the loop did not wait for it.
        assert!(runtime.reactor().is_idle());
    }

    #[test]
    fn test_first_rejects_two_sleeps() {
        let runtime = Runtime::new().unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));

        runtime.spawn(script(
            vec![Token::first([
                Alt::Sleep(Duration::from_millis(1)),
                Alt::Sleep(Duration::from_millis(2)),
            ])],
            results.clone(),
        ));
        runtime.run().unwrap();

        assert!(matches!(
            results.borrow().as_slice(),
            [Resume::Signal(Signal::Error(Error::IncompatibleTokens(_)))]
        ));
    }

    #[test]
    fn test_read_without_connection_fails() {
        let runtime = Runtime::new().unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));

        runtime.spawn(script(vec![Token::read(4), Token::send("x")], results.clone()));
        runtime.run().unwrap();

        let results = results.borrow();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(
            r,
            Resume::Signal(Signal::Error(Error::NoConnection(_)))
        )));
    }

    #[test]
    fn test_parked_tasks_are_abandoned_when_idle() {
        let runtime = Runtime::new().unwrap();
        runtime.spawn(once(Token::wait("never")));

        runtime.run().unwrap();
        assert_eq!(runtime.task_count(), 1);
    }

    #[test]
    fn test_current_is_set_while_running() {
        assert!(Runtime::try_current().is_none());

        let runtime = Runtime::new().unwrap();
        let seen = Rc::new(Cell::new(None));

        let slot = seen.clone();
        runtime.spawn(from_fn(move |_| {
            slot.set(Runtime::current().current_task());
            Step::done(())
        }));
        runtime.run().unwrap();

        assert_eq!(seen.get().map(|id| id.as_u64()), Some(1));
        assert!(Runtime::try_current().is_none());
    }
}
