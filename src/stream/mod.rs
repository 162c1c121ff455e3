//! Pull-based byte streams.
//!
//! [`ByteStream`] owns the buffering algorithm: a window of bytes where everything
//! before the read offset is retained as lookbehind (so recent history can be
//! seeked to) until it grows past `max_lookbehind_bytes` and is forgotten.
//! Producers implement [`ByteSource`] and only decide how to fetch more bytes and
//! how to seek outside the retained window.

mod error;
mod file;
mod memory;

use std::io;

pub use error::{StreamError, StreamResult};
pub use file::FileSource;
pub use memory::{MemoryPipe, SliceSource};

pub const DEFAULT_MAX_LOOKBEHIND_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_EMPTY_PULLS: usize = 4;
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    /// Make up to `n` bytes available; fewer is fine.
    NoMoreThan,
    /// Make exactly `n` bytes available or fail with `NotEnoughData`.
    Exactly,
}

/// How a source handles seeks that land outside the retained window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStrategy {
    /// Forward seeks pull and discard; backward seeks past the window fail.
    ForwardOnly,
    /// The source can restart at any offset via [`ByteSource::reposition`].
    RandomAccess,
    /// Only the retained window is seekable.
    Unsupported,
}

/// Producer side of a [`ByteStream`].
pub trait ByteSource {
    /// Appends up to `max` new bytes to `out` and returns how many were appended.
    /// Returning `Ok(0)` without being exhausted means no progress on this call.
    fn read_more(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize>;

    /// True once the source will never produce another byte.
    fn is_exhausted(&self) -> bool;

    /// Total number of bytes this source produces, when known.
    fn length(&mut self) -> StreamResult<Option<u64>> {
        Ok(None)
    }

    fn seek_strategy(&self) -> SeekStrategy {
        SeekStrategy::Unsupported
    }

    /// Makes the next `read_more` start at absolute `offset`. Only called for
    /// [`SeekStrategy::RandomAccess`] sources.
    fn reposition(&mut self, offset: u64) -> StreamResult<()> {
        Err(StreamError::protocol(format!(
            "source cannot reposition to offset {offset}"
        )))
    }

    fn close(&mut self) -> StreamResult<()> {
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_more(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize> {
        (**self).read_more(out, max)
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }

    fn length(&mut self) -> StreamResult<Option<u64>> {
        (**self).length()
    }

    fn seek_strategy(&self) -> SeekStrategy {
        (**self).seek_strategy()
    }

    fn reposition(&mut self, offset: u64) -> StreamResult<()> {
        (**self).reposition(offset)
    }

    fn close(&mut self) -> StreamResult<()> {
        (**self).close()
    }
}

#[derive(Debug)]
pub struct ByteStream<S> {
    source: S,
    buffer: Vec<u8>,
    offset_in_current_buffer: usize,
    bytes_already_forgotten: u64,
    max_lookbehind_bytes: usize,
    max_empty_pulls: usize,
    closed: bool,
}

impl<S: ByteSource> ByteStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            offset_in_current_buffer: 0,
            bytes_already_forgotten: 0,
            max_lookbehind_bytes: DEFAULT_MAX_LOOKBEHIND_BYTES,
            max_empty_pulls: DEFAULT_MAX_EMPTY_PULLS,
            closed: false,
        }
    }

    pub fn with_max_lookbehind(mut self, bytes: usize) -> Self {
        self.max_lookbehind_bytes = bytes;
        self
    }

    /// Consecutive zero-progress source reads tolerated before an `Exactly` pull
    /// gives up.
    pub fn with_max_empty_pulls(mut self, pulls: usize) -> Self {
        self.max_empty_pulls = pulls;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    pub fn tell(&self) -> u64 {
        self.bytes_already_forgotten + self.offset_in_current_buffer as u64
    }

    pub fn bytes_already_forgotten(&self) -> u64 {
        self.bytes_already_forgotten
    }

    /// Unconsumed bytes currently held in the buffer.
    pub fn available(&self) -> usize {
        self.buffer.len() - self.offset_in_current_buffer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pull(&mut self, n: usize, mode: PullMode) -> StreamResult<usize> {
        if n == 0 {
            return Err(StreamError::InvalidPullSize(n));
        }
        if self.closed {
            return Err(StreamError::Closed);
        }

        let mut empty_pulls = 0usize;
        while self.available() < n && !self.source.is_exhausted() {
            let wanted = n - self.available();
            let read = self.source.read_more(&mut self.buffer, wanted)?;
            if read > 0 {
                empty_pulls = 0;
                if mode == PullMode::NoMoreThan {
                    break;
                }
                continue;
            }
            empty_pulls += 1;
            if empty_pulls > self.max_empty_pulls {
                break;
            }
        }

        let available = self.available();
        if mode == PullMode::Exactly && available < n {
            return Err(StreamError::NotEnoughData {
                requested: n as u64,
                available: available as u64,
            });
        }
        Ok(available.min(n))
    }

    pub fn peek(&self, n: usize) -> &[u8] {
        let start = self.offset_in_current_buffer;
        let end = start + n.min(self.available());
        &self.buffer[start..end]
    }

    pub fn consume(&mut self, n: usize) -> StreamResult<Vec<u8>> {
        let available = self.available();
        if n > available {
            return Err(StreamError::protocol(format!(
                "cannot consume {n} bytes, only {available} buffered"
            )));
        }
        let start = self.offset_in_current_buffer;
        let bytes = self.buffer[start..start + n].to_vec();
        self.offset_in_current_buffer += n;
        self.forget_old_bytes();
        Ok(bytes)
    }

    fn forget_old_bytes(&mut self) {
        if self.offset_in_current_buffer <= self.max_lookbehind_bytes {
            return;
        }
        let forget = self.offset_in_current_buffer - self.max_lookbehind_bytes;
        self.buffer.drain(..forget);
        self.bytes_already_forgotten += forget as u64;
        self.offset_in_current_buffer -= forget;
    }

    pub fn seek(&mut self, offset: u64) -> StreamResult<()> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let window_start = self.bytes_already_forgotten;
        let window_end = window_start + self.buffer.len() as u64;
        if (window_start..=window_end).contains(&offset) {
            self.offset_in_current_buffer = (offset - window_start) as usize;
            return Ok(());
        }

        match self.source.seek_strategy() {
            SeekStrategy::RandomAccess => {
                self.source.reposition(offset)?;
                self.buffer.clear();
                self.offset_in_current_buffer = 0;
                self.bytes_already_forgotten = offset;
                Ok(())
            }
            SeekStrategy::ForwardOnly if offset > window_end => self.skip_forward_to(offset),
            _ => Err(StreamError::NotEnoughData {
                requested: offset,
                available: window_start,
            }),
        }
    }

    fn skip_forward_to(&mut self, offset: u64) -> StreamResult<()> {
        self.offset_in_current_buffer = self.buffer.len();
        self.forget_old_bytes();
        while self.tell() < offset {
            let remaining = offset - self.tell();
            let wanted = remaining.min(DEFAULT_READ_SIZE as u64) as usize;
            let pulled = self.pull(wanted, PullMode::NoMoreThan)?;
            if pulled == 0 {
                return Err(StreamError::NotEnoughData {
                    requested: offset,
                    available: self.tell(),
                });
            }
            self.offset_in_current_buffer += pulled;
            self.forget_old_bytes();
        }
        Ok(())
    }

    pub fn reached_end_of_data(&mut self) -> bool {
        if self.closed {
            return true;
        }
        if self.available() > 0 {
            return false;
        }
        if let Ok(Some(length)) = self.source.length()
            && self.tell() >= length
        {
            return true;
        }
        self.source.is_exhausted()
    }

    pub fn length(&mut self) -> StreamResult<Option<u64>> {
        self.source.length()
    }

    /// Pulls and consumes everything up to the end of the data.
    pub fn read_to_end(&mut self) -> StreamResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let pulled = self.pull(DEFAULT_READ_SIZE, PullMode::NoMoreThan)?;
            if pulled > 0 {
                out.extend(self.consume(pulled)?);
                continue;
            }
            if self.reached_end_of_data() {
                return Ok(out);
            }
            return Err(StreamError::NotEnoughData {
                requested: self.tell() + 1,
                available: self.tell(),
            });
        }
    }

    pub fn close(&mut self) -> StreamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.source.close()?;
        self.closed = true;
        self.buffer.clear();
        self.offset_in_current_buffer = 0;
        Ok(())
    }
}

impl<S: ByteSource> io::Read for ByteStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.reached_end_of_data() {
            return Ok(0);
        }
        let pulled = self.pull(buf.len(), PullMode::NoMoreThan)?;
        if pulled == 0 {
            if self.reached_end_of_data() {
                return Ok(0);
            }
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "byte source made no progress",
            ));
        }
        let bytes = self.consume(pulled)?;
        buf[..pulled].copy_from_slice(&bytes);
        Ok(pulled)
    }
}
