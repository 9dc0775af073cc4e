use super::computation::{Computation, Resume, Signal, Step};
use super::token::Token;
use super::value::{Key, Value};
use crate::net::Connection;
use crate::reactor::Timer;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Identifier of a task, unique for the lifetime of a runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the result of a job has to go.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Reply {
    pub(crate) caller: TaskId,

    /// Caller epoch at the time of the call; a stale reply is dropped.
    pub(crate) epoch: u64,
}

/// Work submitted to another task's inbox.
pub(crate) struct Job {
    pub(crate) computation: Box<dyn Computation>,
    pub(crate) reply: Option<Reply>,
}

/// One level of a task's computation stack.
pub(crate) struct Frame {
    computation: Box<dyn Computation>,

    /// Set for frames started by [`Token::Serve`].
    is_job: bool,

    /// Caller still waiting for this job; taken once answered.
    reply: Option<Reply>,
}

impl Frame {
    pub(crate) fn new(computation: Box<dyn Computation>) -> Self {
        Self {
            computation,
            is_job: false,
            reply: None,
        }
    }

    pub(crate) fn job(job: Job) -> Self {
        Self {
            computation: job.computation,
            is_job: true,
            reply: job.reply,
        }
    }
}

/// What a parked task is waiting for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Pending {
    /// Runnable, or being driven right now.
    Idle,
    /// Spawned but not started yet.
    Start,
    Read,
    Sleep,
    Wait,
    Call(TaskId),
    Serve,
    Drain,
    First(FirstArms),
}

/// Bookkeeping of a parked [`Token::First`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct FirstArms {
    /// Index of the read alternative, if any.
    pub(crate) read: Option<usize>,

    /// Waited keys with their alternative index.
    pub(crate) waits: Vec<(Key, usize)>,
}

/// How the driver wants the trampoline to continue after a token.
pub(crate) enum Flow {
    /// Resume the current computation right away.
    Resume(Resume),

    /// Run a nested frame first.
    Push(Frame),

    /// Complete the current computation with a value.
    Return(Value),

    /// The task is suspended; a later wake resumes it.
    Park,
}

/// How a pass of [`Task::advance`] ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Parked,
    Finished(Value),
    Failed(Signal),
}

/// The token interpreter behind the trampoline.
pub(crate) trait Driver {
    fn handle_token(&self, task: &mut Task, token: Token) -> Flow;

    /// A served job completed or failed; `reply` names the waiting caller.
    fn job_done(&self, server: TaskId, reply: Reply, result: Result<Value, Signal>);
}

/// Factory restarting a keep-alive task.
pub(crate) type Restart = Rc<dyn Fn() -> Box<dyn Computation>>;

/// A schedulable stack of computations.
///
/// The bottom frame is the root computation; the top frame is the one
/// currently running. The stack is explicit, so a completion value or a
/// signal always lands in the frame directly below the one that produced it.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) label: Option<String>,
    stack: Vec<Frame>,

    pub(crate) pending: Pending,

    /// Bumped on every wake; wakes carrying an older epoch are ignored.
    pub(crate) epoch: u64,

    /// Timer of the current sleep, if any.
    pub(crate) wakeup: Option<Timer>,

    pub(crate) inbox: VecDeque<Job>,
    pub(crate) connection: Option<Rc<RefCell<Connection>>>,
    pub(crate) restart: Option<Restart>,
}

impl Task {
    pub(crate) fn new(id: TaskId, label: Option<String>, root: Box<dyn Computation>) -> Self {
        Self {
            id,
            label,
            stack: vec![Frame::new(root)],
            pending: Pending::Start,
            epoch: 0,
            wakeup: None,
            inbox: VecDeque::new(),
            connection: None,
            restart: None,
        }
    }

    pub(crate) fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("-")
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn is_parked(&self) -> bool {
        self.pending != Pending::Idle
    }

    /// Marks the task as suspended and returns the epoch its wakes must carry.
    pub(crate) fn park(&mut self, pending: Pending) -> u64 {
        self.pending = pending;
        self.epoch
    }

    /// Drops everything a parked task was waiting on, so that no other
    /// alternative can deliver afterwards.
    ///
    /// Returns the previous pending state. Rendezvous registrations are
    /// owned by the runtime and cleared there.
    pub(crate) fn clear_pending(&mut self) -> Pending {
        if let Some(timer) = self.wakeup.take() {
            timer.cancel();
        }

        let previous = std::mem::replace(&mut self.pending, Pending::Idle);

        if matches!(previous, Pending::Read | Pending::First(FirstArms { read: Some(_), .. })) {
            if let Some(connection) = &self.connection {
                connection.borrow_mut().input.clear_term();
            }
        }

        self.epoch += 1;
        previous
    }

    /// Puts a frame on top; the next [`advance`](Self::advance) starts it.
    pub(crate) fn push(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    /// `true` while some frame on the stack serves a job.
    pub(crate) fn in_job(&self) -> bool {
        self.stack.iter().any(|frame| frame.is_job)
    }

    /// Takes the reply slot of the innermost job that has not answered yet.
    pub(crate) fn take_reply(&mut self) -> Option<Reply> {
        self.stack
            .iter_mut()
            .rev()
            .filter(|frame| frame.is_job)
            .find_map(|frame| frame.reply.take())
    }

    /// Runs the trampoline until the task parks, finishes or fails.
    pub(crate) fn advance(&mut self, input: Resume, driver: &dyn Driver) -> Outcome {
        let mut input = input;

        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Outcome::Finished(Value::Unit);
            };

            let step = frame.computation.resume(input);

            let result = match step {
                Step::Call(computation) => {
                    self.stack.push(Frame::new(computation));
                    input = Resume::Start;
                    continue;
                }
                Step::Yield(token) => match driver.handle_token(self, token) {
                    Flow::Resume(next) => {
                        input = next;
                        continue;
                    }
                    Flow::Push(frame) => {
                        self.stack.push(frame);
                        input = Resume::Start;
                        continue;
                    }
                    Flow::Return(value) => Ok(value),
                    Flow::Park => return Outcome::Parked,
                },
                Step::Return(value) => Ok(value),
                Step::Raise(signal) => Err(signal),
            };

            match self.unwind(result, driver) {
                Ok(next) => input = next,
                Err(outcome) => return outcome,
            }
        }
    }

    /// Pops the finished top frame and turns its result into the input of
    /// the new top, or into the task outcome when the stack is empty.
    fn unwind(&mut self, result: Result<Value, Signal>, driver: &dyn Driver) -> Result<Resume, Outcome> {
        let Some(frame) = self.stack.pop() else {
            return Err(match result {
                Ok(value) => Outcome::Finished(value),
                Err(signal) => Outcome::Failed(signal),
            });
        };

        let result = if frame.is_job {
            // A job reports to its caller; the serving computation only
            // learns the value, never the job's failure.
            match result {
                Ok(value) => {
                    if let Some(reply) = frame.reply {
                        driver.job_done(self.id, reply, Ok(value.clone()));
                    }
                    Ok(value)
                }
                Err(signal) => {
                    tracing::debug!(task = %self.id, %signal, "job failed");
                    if let Some(reply) = frame.reply {
                        driver.job_done(self.id, reply, Err(signal));
                    }
                    Ok(Value::Unit)
                }
            }
        } else {
            result
        };

        if self.stack.is_empty() {
            return Err(match result {
                Ok(value) => Outcome::Finished(value),
                Err(signal) => Outcome::Failed(signal),
            });
        }

        Ok(match result {
            Ok(value) => Resume::Value(value),
            Err(signal) => Resume::Signal(signal),
        })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("depth", &self.stack.len())
            .field("pending", &self.pending)
            .field("epoch", &self.epoch)
            .finish()
    }
}
