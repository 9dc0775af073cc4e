use crate::error::{Error, Result};

use bytes::{Bytes, BytesMut};

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

/// Priority used by [`OutQueue::add`].
pub const DEFAULT_PRIORITY: i32 = 5;

/// Priority of data pushed back by [`OutQueue::backup`]; nothing outranks it.
const BACKUP_PRIORITY: i32 = i32::MAX;

/// A unit of outbound data.
pub enum Chunk {
    /// Bytes already in memory.
    Bytes(Bytes),

    /// A reader consumed lazily, `len` bytes long.
    Stream { reader: Box<dyn Read>, len: u64 },
}

impl Chunk {
    /// A stream of `len` bytes read from `reader` as the socket drains.
    pub fn stream(reader: impl Read + 'static, len: u64) -> Self {
        Chunk::Stream {
            reader: Box::new(reader),
            len,
        }
    }

    /// A stream covering everything from the reader's current position to its end.
    pub fn seekable(mut reader: impl Read + Seek + 'static) -> io::Result<Self> {
        let position = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(position))?;

        Ok(Chunk::stream(reader, end.saturating_sub(position)))
    }

    pub fn len(&self) -> u64 {
        match self {
            Chunk::Bytes(bytes) => bytes.len() as u64,
            Chunk::Stream { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Chunk::Stream { len, .. } => f.debug_struct("Stream").field("len", len).finish(),
        }
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk::Bytes(bytes.into())
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::Bytes(text.into())
    }
}

impl From<&'static str> for Chunk {
    fn from(text: &'static str) -> Self {
        Chunk::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(bytes: &'static [u8]) -> Self {
        Chunk::Bytes(Bytes::from_static(bytes))
    }
}

enum Source {
    Memory(BytesMut),
    Stream { reader: Box<dyn Read>, remaining: u64 },
}

impl Source {
    fn remaining(&self) -> u64 {
        match self {
            Source::Memory(bytes) => bytes.len() as u64,
            Source::Stream { remaining, .. } => *remaining,
        }
    }
}

struct Entry {
    source: Source,
    priority: i32,
}

/// Write-side queue with priorities, coalescing and backpressure.
///
/// Entries drain highest priority first and in insertion order within a
/// priority. Small in-memory chunks are merged into the previous entry of
/// the same priority while the merged buffer stays under half the limit.
///
/// Once [`close_request`](Self::close_request) was called, a read from the
/// drained queue reports [`Error::CloseRequested`] instead of empty bytes.
#[derive(Default)]
pub struct OutQueue {
    entries: VecDeque<Entry>,
    used: u64,
    limit: Option<usize>,
    close_requested: bool,
    low_watermark: Vec<Box<dyn FnOnce()>>,
}

impl OutQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Sets the backpressure limit; `None` or `Some(0)` means unlimited.
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit.filter(|l| *l > 0);
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Queues a chunk at the default priority.
    ///
    /// Fails with [`Error::LimitReached`] once the bytes already queued
    /// reach the limit. A chunk added below the limit is taken whole even
    /// when it overshoots, so a single large send is never refused.
    pub fn add(&mut self, chunk: impl Into<Chunk>) -> Result<()> {
        self.add_with_priority(chunk, DEFAULT_PRIORITY)
    }

    /// Queues a chunk behind every entry of equal or higher priority.
    ///
    /// The check happens before the chunk is counted, so the chunk that
    /// reaches the limit is still accepted whole.
    pub fn add_with_priority(&mut self, chunk: impl Into<Chunk>, priority: i32) -> Result<()> {
        if self.close_requested {
            return Err(Error::QueueClosed);
        }

        if let Some(limit) = self.limit {
            if self.used >= limit as u64 {
                return Err(Error::LimitReached { limit });
            }
        }

        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }

        self.used += chunk.len();

        let index = self.entries.partition_point(|e| e.priority >= priority);

        if let Chunk::Bytes(bytes) = &chunk {
            if let Some(previous) = index.checked_sub(1).and_then(|i| self.entries.get_mut(i)) {
                if previous.priority == priority {
                    if let Source::Memory(buffer) = &mut previous.source {
                        let fits = match self.limit {
                            Some(limit) => buffer.len() + bytes.len() < limit / 2,
                            None => true,
                        };

                        if fits {
                            buffer.extend_from_slice(bytes);
                            return Ok(());
                        }
                    }
                }
            }
        }

        let source = match chunk {
            Chunk::Bytes(bytes) => Source::Memory(BytesMut::from(&bytes[..])),
            Chunk::Stream { reader, len } => Source::Stream {
                reader,
                remaining: len,
            },
        };

        self.entries.insert(index, Entry { source, priority });
        Ok(())
    }

    /// Pops up to `amt` bytes in queue order.
    ///
    /// An empty result means there is nothing to send right now. After a
    /// read that leaves the queue below its limit, the registered
    /// low-watermark callbacks run once.
    pub fn read(&mut self, amt: usize) -> Result<Bytes> {
        if self.entries.is_empty() {
            if self.close_requested {
                return Err(Error::CloseRequested);
            }
            return Ok(Bytes::new());
        }

        let mut out = BytesMut::new();

        while out.len() < amt {
            let Some(entry) = self.entries.front_mut() else {
                break;
            };

            let want = amt - out.len();

            match &mut entry.source {
                Source::Memory(buffer) => {
                    let n = want.min(buffer.len());
                    if out.is_empty() {
                        out = buffer.split_to(n);
                    } else {
                        out.extend_from_slice(&buffer.split_to(n));
                    }
                    self.used -= n as u64;
                }
                Source::Stream { reader, remaining } => {
                    let want = (want as u64).min(*remaining) as usize;
                    let start = out.len();
                    out.resize(start + want, 0);

                    match reader.read(&mut out[start..]) {
                        Ok(0) => {
                            // The stream ended early; forget what it promised.
                            out.truncate(start);
                            self.used -= *remaining;
                            *remaining = 0;
                        }
                        Ok(n) => {
                            out.truncate(start + n);
                            *remaining -= n as u64;
                            self.used -= n as u64;
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                            out.truncate(start);
                            continue;
                        }
                        Err(err) => {
                            out.truncate(start);
                            if out.is_empty() {
                                return Err(err.into());
                            }
                            break;
                        }
                    }
                }
            }

            if entry.source.remaining() == 0 {
                self.entries.pop_front();
            }
        }

        if !out.is_empty() {
            self.notify_low_watermark();
        }

        Ok(out.freeze())
    }

    /// Puts unsent bytes back at the very front of the queue.
    ///
    /// Allowed after [`close_request`](Self::close_request): the bytes were
    /// accepted before the close.
    pub fn backup(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }

        self.used += bytes.len() as u64;
        self.entries.push_front(Entry {
            source: Source::Memory(BytesMut::from(&bytes[..])),
            priority: BACKUP_PRIORITY,
        });
    }

    /// Refuses further [`add`](Self::add) calls; the queue still drains.
    pub fn close_request(&mut self) {
        self.close_requested = true;
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    /// `true` when there is no data and no pending close request.
    pub fn is_empty(&self) -> bool {
        !self.close_requested && self.entries.is_empty()
    }

    /// `true` when a write pass has something to do: data or a close.
    pub fn wants_write(&self) -> bool {
        !self.is_empty()
    }

    /// Bytes queued but not yet read.
    pub fn used(&self) -> u64 {
        self.used
    }

    /// `true` once the limit refuses new chunks.
    pub fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.used >= limit as u64)
    }

    /// Registers a one-shot callback for the next read that leaves the
    /// queue below its limit.
    pub fn on_low_watermark(&mut self, f: impl FnOnce() + 'static) {
        self.low_watermark.push(Box::new(f));
    }

    fn notify_low_watermark(&mut self) {
        if self.is_full() || self.low_watermark.is_empty() {
            return;
        }

        for callback in std::mem::take(&mut self.low_watermark) {
            callback();
        }
    }
}

impl fmt::Debug for OutQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutQueue")
            .field("entries", &self.entries.len())
            .field("used", &self.used)
            .field("limit", &self.limit)
            .field("close_requested", &self.close_requested)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Chunk, OutQueue};
    use crate::Error;

    use std::cell::Cell;
    use std::io::Cursor;
    use std::rc::Rc;

    #[test]
    fn test_backup_replays_bytes() {
        let mut queue = OutQueue::new();
        queue.add("foo").unwrap();

        assert_eq!(queue.read(2).unwrap(), "fo");
        queue.backup("fo");
        assert_eq!(queue.read(2).unwrap(), "fo");
        assert_eq!(queue.read(2).unwrap(), "o");
        assert_eq!(queue.read(2).unwrap(), "");
    }

    #[test]
    fn test_close_drains_then_signals() {
        let mut queue = OutQueue::new();
        queue.add("foo").unwrap();
        queue.close_request();
        queue.close_request();

        assert!(matches!(queue.add("bar"), Err(Error::QueueClosed)));
        assert!(!queue.is_empty());
        assert_eq!(queue.read(1000).unwrap(), "foo");
        assert!(matches!(queue.read(1000), Err(Error::CloseRequested)));
    }

    #[test]
    fn test_reads_span_entries() {
        let mut queue = OutQueue::new();
        queue.add("ab").unwrap();
        queue.add(Chunk::stream(Cursor::new(b"cdef".to_vec()), 4)).unwrap();
        queue.add("gh").unwrap();

        assert_eq!(queue.used(), 8);
        assert_eq!(queue.read(5).unwrap(), "abcde");
        assert_eq!(queue.read(100).unwrap(), "fgh");
        assert_eq!(queue.used(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_long_input_round_trips() {
        let mut queue = OutQueue::new();
        let mut expected = Vec::new();

        for i in 0..500u32 {
            let line = format!("line {i}\n");
            expected.extend_from_slice(line.as_bytes());
            queue.add(line).unwrap();
        }

        let mut out = Vec::new();
        loop {
            let chunk = queue.read(333).unwrap();
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }

        assert_eq!(out, expected);
    }

    #[test]
    fn test_priority_order() {
        let mut queue = OutQueue::new();
        queue.add("low ").unwrap();
        queue.add_with_priority("high ", 10).unwrap();
        queue.add_with_priority("lowest", 0).unwrap();
        queue.add("more ").unwrap();
        queue.add_with_priority("higher ", 10).unwrap();

        assert_eq!(queue.read(1000).unwrap(), "high higher low more lowest");
    }

    #[test]
    fn test_backup_goes_before_priorities() {
        let mut queue = OutQueue::new();
        queue.add_with_priority("urgent", 100).unwrap();
        queue.backup("rest ");

        assert_eq!(queue.read(1000).unwrap(), "rest urgent");
    }

    #[test]
    fn test_seekable_stream_from_position() {
        let mut cursor = Cursor::new(b"skip:payload".to_vec());
        cursor.set_position(5);

        let chunk = Chunk::seekable(cursor).unwrap();
        assert_eq!(chunk.len(), 7);

        let mut queue = OutQueue::new();
        queue.add(chunk).unwrap();
        assert_eq!(queue.read(3).unwrap(), "pay");
        assert_eq!(queue.read(10).unwrap(), "load");
    }

    #[test]
    fn test_limit_and_low_watermark() {
        let mut queue = OutQueue::with_limit(8);
        queue.add("12345").unwrap();
        queue.add("6789").unwrap();

        assert!(queue.is_full());
        assert!(matches!(
            queue.add("x"),
            Err(Error::LimitReached { limit: 8 })
        ));

        let drained = Rc::new(Cell::new(0));
        let counter = drained.clone();
        queue.on_low_watermark(move || counter.set(counter.get() + 1));

        assert_eq!(queue.read(1).unwrap(), "1");
        assert_eq!(drained.get(), 0);

        assert_eq!(queue.read(4).unwrap(), "2345");
        assert_eq!(drained.get(), 1);

        assert_eq!(queue.read(4).unwrap(), "6789");
        assert_eq!(drained.get(), 1);
        queue.add("x").unwrap();
    }

    #[test]
    fn test_chunk_below_limit_may_overshoot() {
        let mut queue = OutQueue::with_limit(8);
        queue.add(vec![b'a'; 1 << 20]).unwrap();

        assert_eq!(queue.used(), 1 << 20);
        assert!(matches!(
            queue.add("b"),
            Err(Error::LimitReached { limit: 8 })
        ));
    }

    #[test]
    fn test_streams_short_of_length_are_retired() {
        let mut queue = OutQueue::new();
        queue.add(Chunk::stream(Cursor::new(b"ab".to_vec()), 5)).unwrap();
        queue.add("c").unwrap();

        assert_eq!(queue.read(10).unwrap(), "abc");
        assert_eq!(queue.used(), 0);
    }
}
