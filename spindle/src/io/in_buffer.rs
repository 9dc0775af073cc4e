use bytes::{Buf, Bytes, BytesMut};

use std::collections::VecDeque;

/// Condition that decides when buffered input forms a complete message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
    /// Exactly this many bytes.
    Bytes(usize),

    /// Everything up to and including the delimiter.
    Until(Bytes),

    /// Whatever is buffered, as long as it is not empty.
    Any,
}

impl Term {
    /// A delimiter condition.
    pub fn until(delimiter: impl Into<Bytes>) -> Self {
        Term::Until(delimiter.into())
    }

    /// A line terminated by `\r\n`.
    pub fn eol() -> Self {
        Term::Until(Bytes::from_static(b"\r\n"))
    }
}

/// Read-side framing buffer.
///
/// Received chunks are kept as they arrive; a message is cut out only when
/// the current [`Term`] is satisfied. A satisfied condition is consumed, so
/// the buffer keeps accumulating until the next [`set_term`](Self::set_term).
///
/// Delimiter conditions scan the whole buffered input again on every check.
#[derive(Debug, Default)]
pub struct InBuffer {
    chunks: VecDeque<Bytes>,
    len: usize,
    term: Option<Term>,
}

impl InBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current condition.
    pub fn set_term(&mut self, term: Term) {
        self.term = Some(term);
    }

    /// Drops the current condition; buffered bytes stay.
    pub fn clear_term(&mut self) {
        self.term = None;
    }

    pub fn term(&self) -> Option<&Term> {
        self.term.as_ref()
    }

    /// Appends `data`, then runs [`check`](Self::check).
    pub fn feed(&mut self, data: impl Into<Bytes>) -> Option<Bytes> {
        let data = data.into();

        if !data.is_empty() {
            self.len += data.len();
            self.chunks.push_back(data);
        }

        self.check()
    }

    /// Cuts the next message out of the buffer if the condition allows it.
    pub fn check(&mut self) -> Option<Bytes> {
        let end = match self.term.as_ref()? {
            Term::Bytes(n) => (self.len >= *n).then_some(*n)?,
            Term::Any => (self.len > 0).then_some(self.len)?,
            Term::Until(delimiter) => {
                let delimiter = delimiter.clone();
                self.find(&delimiter)? + delimiter.len()
            }
        };

        self.term = None;
        Some(self.take(end))
    }

    /// Takes every buffered byte, leaving the buffer empty.
    pub fn pop(&mut self) -> Bytes {
        let len = self.len;
        self.take(len)
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn find(&mut self, delimiter: &[u8]) -> Option<usize> {
        if delimiter.is_empty() {
            return Some(0);
        }

        self.coalesce();
        let haystack = self.chunks.front()?;

        haystack
            .windows(delimiter.len())
            .position(|window| window == delimiter)
    }

    /// Merges every chunk into one contiguous buffer.
    fn coalesce(&mut self) {
        if self.chunks.len() < 2 {
            return;
        }

        let mut joined = BytesMut::with_capacity(self.len);
        for chunk in self.chunks.drain(..) {
            joined.extend_from_slice(&chunk);
        }

        self.chunks.push_back(joined.freeze());
    }

    fn take(&mut self, n: usize) -> Bytes {
        debug_assert!(n <= self.len);

        if let Some(front) = self.chunks.front_mut() {
            if front.len() >= n {
                let out = front.split_to(n);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                self.len -= n;
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };

            let want = (n - out.len()).min(front.len());
            out.extend_from_slice(&front[..want]);
            front.advance(want);

            if front.is_empty() {
                self.chunks.pop_front();
            }
        }

        self.len -= out.len();
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::{InBuffer, Term};

    #[test]
    fn test_byte_count_after_accumulating() {
        let mut buffer = InBuffer::new();

        assert_eq!(buffer.feed("rock"), None);
        buffer.set_term(Term::Bytes(10));
        assert_eq!(buffer.feed("rockandroll").as_deref(), Some(&b"rockrockan"[..]));
        assert_eq!(buffer.len(), 5);

        buffer.set_term(Term::Any);
        assert_eq!(buffer.check().as_deref(), Some(&b"droll"[..]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_delimiter_across_feeds() {
        let mut buffer = InBuffer::new();
        buffer.set_term(Term::until("!"));

        assert_eq!(buffer.feed("rock"), None);
        assert_eq!(buffer.feed("and"), None);
        assert_eq!(buffer.feed("roll!more").as_deref(), Some(&b"rockandroll!"[..]));
        assert_eq!(buffer.pop(), "more");
    }

    #[test]
    fn test_split_delimiter() {
        let mut buffer = InBuffer::new();
        buffer.set_term(Term::eol());

        assert_eq!(buffer.feed("hello\r"), None);
        assert_eq!(buffer.feed("\nworld").as_deref(), Some(&b"hello\r\n"[..]));
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_condition_is_consumed() {
        let mut buffer = InBuffer::new();
        buffer.set_term(Term::Bytes(2));

        assert_eq!(buffer.feed("abcd").as_deref(), Some(&b"ab"[..]));
        assert_eq!(buffer.term(), None);
        assert_eq!(buffer.check(), None);

        buffer.set_term(Term::Bytes(2));
        assert_eq!(buffer.check().as_deref(), Some(&b"cd"[..]));
    }

    #[test]
    fn test_hybrid_switching() {
        let mut buffer = InBuffer::new();
        buffer.feed("HEADER\r\n0123456789tail");

        buffer.set_term(Term::eol());
        assert_eq!(buffer.check().as_deref(), Some(&b"HEADER\r\n"[..]));

        buffer.set_term(Term::Bytes(10));
        assert_eq!(buffer.check().as_deref(), Some(&b"0123456789"[..]));

        buffer.set_term(Term::until("x"));
        assert_eq!(buffer.check(), None);

        buffer.clear_term();
        assert_eq!(buffer.feed("x"), None);
        assert_eq!(buffer.pop(), "tailx");
    }

    #[test]
    fn test_bytewise_feeding_loses_nothing() {
        let input = b"one\r\ntwo\r\nthree\r\nrest";
        let mut buffer = InBuffer::new();
        let mut out = Vec::new();

        buffer.set_term(Term::eol());
        for byte in input {
            if let Some(message) = buffer.feed(vec![*byte]) {
                out.extend_from_slice(&message);
                buffer.set_term(Term::eol());
            }
        }
        out.extend_from_slice(&buffer.pop());

        assert_eq!(out, input);
    }

    #[test]
    fn test_any_needs_data() {
        let mut buffer = InBuffer::new();
        buffer.set_term(Term::Any);

        assert_eq!(buffer.check(), None);
        assert_eq!(buffer.feed(""), None);
        assert_eq!(buffer.feed("x").as_deref(), Some(&b"x"[..]));
    }
}
