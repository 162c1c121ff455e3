use bytes::{Buf, Bytes, BytesMut};

use super::{ByteSource, SeekStrategy, StreamError, StreamResult};

/// Append-only in-memory pipe. A writer appends, the owning stream drains.
/// Bytes that left the stream's window cannot be recovered.
#[derive(Debug, Default)]
pub struct MemoryPipe {
    pending: BytesMut,
    total_written: u64,
    writing_closed: bool,
}

impl MemoryPipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) -> StreamResult<()> {
        if self.writing_closed {
            return Err(StreamError::Closed);
        }
        self.pending.extend_from_slice(data);
        self.total_written += data.len() as u64;
        Ok(())
    }

    pub fn close_writing(&mut self) {
        self.writing_closed = true;
    }

    pub fn is_writing_closed(&self) -> bool {
        self.writing_closed
    }
}

impl ByteSource for MemoryPipe {
    fn read_more(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize> {
        let take = max.min(self.pending.len());
        out.extend_from_slice(&self.pending.split_to(take));
        Ok(take)
    }

    fn is_exhausted(&self) -> bool {
        self.writing_closed && self.pending.is_empty()
    }

    fn length(&mut self) -> StreamResult<Option<u64>> {
        Ok(self.writing_closed.then_some(self.total_written))
    }
}

/// Fixed bytes with random access.
#[derive(Debug, Clone)]
pub struct SliceSource {
    data: Bytes,
    position: usize,
}

impl SliceSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }
}

impl ByteSource for SliceSource {
    fn read_more(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize> {
        let mut rest = self.data.slice(self.position..);
        let take = max.min(rest.remaining());
        out.extend_from_slice(&rest.copy_to_bytes(take));
        self.position += take;
        Ok(take)
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.data.len()
    }

    fn length(&mut self) -> StreamResult<Option<u64>> {
        Ok(Some(self.data.len() as u64))
    }

    fn seek_strategy(&self) -> SeekStrategy {
        SeekStrategy::RandomAccess
    }

    fn reposition(&mut self, offset: u64) -> StreamResult<()> {
        if offset > self.data.len() as u64 {
            return Err(StreamError::NotEnoughData {
                requested: offset,
                available: self.data.len() as u64,
            });
        }
        self.position = offset as usize;
        Ok(())
    }
}
