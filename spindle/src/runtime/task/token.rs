use super::computation::Computation;
use super::core::TaskId;
use super::value::{Key, Value};
use crate::io::{Chunk, DEFAULT_PRIORITY, Term};

use std::fmt;
use std::time::Duration;

/// What a computation asks of the driver when it yields.
///
/// Only [`Read`](Token::Read), [`Sleep`](Token::Sleep), [`Wait`](Token::Wait),
/// [`Call`](Token::Call), [`Serve`](Token::Serve), [`Drain`](Token::Drain)
/// and [`First`](Token::First) can suspend the task. Every other token is
/// handled within the same driver pass and the computation resumes at once.
pub enum Token {
    /// Queue outbound data on the task's connection. Resumes with `Unit`.
    Send { chunk: Chunk, priority: i32 },

    /// Read a framed message from the task's connection. Resumes with `Bytes`.
    Read(Term),

    /// Resume after `duration`; zero yields to the next reactor tick.
    Sleep(Duration),

    /// Suspend until the key is fired. Resumes with the fired value.
    Wait(Key),

    /// Wake every current waiter of the key. Resumes with `Unit`.
    Fire(Key, Value),

    /// Run `job` inside task `target` and resume with its result.
    Call {
        target: TaskId,
        job: Box<dyn Computation>,
    },

    /// Queue `job` on task `target` without waiting for it.
    Message {
        target: TaskId,
        job: Box<dyn Computation>,
    },

    /// Run the next job from this task's inbox as a nested computation.
    Serve,

    /// Answer the caller of the job being served and keep running.
    Respond(Value),

    /// Suspend until the connection's out queue drops below its limit.
    Drain,

    /// Suspend on several alternatives; the first to resolve wins.
    First(Vec<Alt>),
}

/// One arm of a [`Token::First`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Alt {
    Sleep(Duration),
    Wait(Key),
    Read(Term),
}

impl Token {
    pub fn send(chunk: impl Into<Chunk>) -> Self {
        Token::Send {
            chunk: chunk.into(),
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn send_with_priority(chunk: impl Into<Chunk>, priority: i32) -> Self {
        Token::Send {
            chunk: chunk.into(),
            priority,
        }
    }

    /// Exactly `n` bytes.
    pub fn read(n: usize) -> Self {
        Token::Read(Term::Bytes(n))
    }

    /// Everything through `delimiter`.
    pub fn until(delimiter: impl Into<bytes::Bytes>) -> Self {
        Token::Read(Term::until(delimiter))
    }

    pub fn until_eol() -> Self {
        Token::Read(Term::eol())
    }

    /// Whatever is buffered, or the next bytes to arrive.
    pub fn receive() -> Self {
        Token::Read(Term::Any)
    }

    pub fn sleep(duration: Duration) -> Self {
        Token::Sleep(duration)
    }

    /// Gives other tasks a turn without a real delay.
    pub fn yield_now() -> Self {
        Token::Sleep(Duration::ZERO)
    }

    pub fn wait(key: impl Into<Key>) -> Self {
        Token::Wait(key.into())
    }

    pub fn fire(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Token::Fire(key.into(), value.into())
    }

    pub fn call(target: TaskId, job: impl Computation) -> Self {
        Token::Call {
            target,
            job: Box::new(job),
        }
    }

    pub fn message(target: TaskId, job: impl Computation) -> Self {
        Token::Message {
            target,
            job: Box::new(job),
        }
    }

    pub fn respond(value: impl Into<Value>) -> Self {
        Token::Respond(value.into())
    }

    pub fn first(alts: impl IntoIterator<Item = Alt>) -> Self {
        Token::First(alts.into_iter().collect())
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Token::Send { .. } => "send",
            Token::Read(_) => "read",
            Token::Sleep(_) => "sleep",
            Token::Wait(_) => "wait",
            Token::Fire(..) => "fire",
            Token::Call { .. } => "call",
            Token::Message { .. } => "message",
            Token::Serve => "serve",
            Token::Respond(_) => "respond",
            Token::Drain => "drain",
            Token::First(_) => "first",
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Send { chunk, priority } => f
                .debug_struct("Send")
                .field("chunk", chunk)
                .field("priority", priority)
                .finish(),
            Token::Read(term) => f.debug_tuple("Read").field(term).finish(),
            Token::Sleep(duration) => f.debug_tuple("Sleep").field(duration).finish(),
            Token::Wait(key) => f.debug_tuple("Wait").field(key).finish(),
            Token::Fire(key, value) => f.debug_tuple("Fire").field(key).field(value).finish(),
            Token::Call { target, .. } => f.debug_struct("Call").field("target", target).finish(),
            Token::Message { target, .. } => {
                f.debug_struct("Message").field("target", target).finish()
            }
            Token::Serve => f.write_str("Serve"),
            Token::Respond(value) => f.debug_tuple("Respond").field(value).finish(),
            Token::Drain => f.write_str("Drain"),
            Token::First(alts) => f.debug_tuple("First").field(alts).finish(),
        }
    }
}
