use super::token::Token;
use super::value::Value;
use crate::error::Error;

use bytes::Bytes;

use std::fmt;

/// One suspendable unit of logic inside a task.
///
/// The driver calls [`resume`](Computation::resume) with whatever the last
/// suspension produced and the computation answers with a single [`Step`].
/// Nesting is expressed by returning [`Step::Call`]; the driver keeps the
/// stack, so nesting depth never grows the native call stack.
pub trait Computation: 'static {
    fn resume(&mut self, input: Resume) -> Step;
}

impl Computation for Box<dyn Computation> {
    fn resume(&mut self, input: Resume) -> Step {
        (**self).resume(input)
    }
}

/// What the driver injects when a computation is resumed.
#[derive(Debug)]
pub enum Resume {
    /// First resume of a freshly pushed computation.
    Start,

    /// Result of the last token or of a nested computation.
    Value(Value),

    /// A failure raised at the last suspension point.
    Signal(Signal),
}

impl Resume {
    /// Turns the input into a plain result; `Start` counts as `Unit`.
    pub fn into_result(self) -> Result<Value, Signal> {
        match self {
            Resume::Start => Ok(Value::Unit),
            Resume::Value(value) => Ok(value),
            Resume::Signal(signal) => Err(signal),
        }
    }
}

/// What a computation answers when resumed.
#[derive(Debug)]
pub enum Step {
    /// Push a nested computation and run it.
    Call(Box<dyn Computation>),

    /// Finish with a value, handed to the computation below.
    Return(Value),

    /// Ask the driver for something.
    Yield(Token),

    /// Finish with a failure, injected into the computation below.
    Raise(Signal),
}

impl Step {
    pub fn call(computation: impl Computation) -> Self {
        Step::Call(Box::new(computation))
    }

    pub fn done(value: impl Into<Value>) -> Self {
        Step::Return(value.into())
    }
}

impl From<Token> for Step {
    fn from(token: Token) -> Self {
        Step::Yield(token)
    }
}

impl fmt::Debug for dyn Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Computation")
    }
}

/// A failure travelling through a task's stack.
#[derive(Debug)]
pub enum Signal {
    /// The peer closed the connection, or it failed fatally. `unread` holds
    /// bytes that were buffered but never consumed.
    ConnectionClosed { unread: Bytes },

    Error(Error),
}

impl Signal {
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Signal::ConnectionClosed { .. })
    }
}

impl From<Error> for Signal {
    fn from(err: Error) -> Self {
        Signal::Error(err)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::ConnectionClosed { unread } => {
                write!(f, "connection closed ({} bytes unread)", unread.len())
            }
            Signal::Error(err) => err.fmt(f),
        }
    }
}

/// A computation driven by a closure.
pub struct FromFn<F>(F);

impl<F> Computation for FromFn<F>
where
    F: FnMut(Resume) -> Step + 'static,
{
    fn resume(&mut self, input: Resume) -> Step {
        (self.0)(input)
    }
}

/// Builds a computation from a closure called on every resume.
///
/// State that must survive a suspension lives in the closure's captures.
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: FnMut(Resume) -> Step + 'static,
{
    FromFn(f)
}

/// A computation that yields one token and completes with its result.
///
/// Signals raised at the token propagate to the caller unchanged.
pub fn once(token: Token) -> impl Computation {
    let mut token = Some(token);

    from_fn(move |input| match token.take() {
        Some(token) => Step::Yield(token),
        None => match input.into_result() {
            Ok(value) => Step::Return(value),
            Err(signal) => Step::Raise(signal),
        },
    })
}

/// A computation that completes right away with `value`.
pub fn ready(value: impl Into<Value>) -> impl Computation {
    let mut value = Some(value.into());
    from_fn(move |_| Step::Return(value.take().unwrap_or_default()))
}
