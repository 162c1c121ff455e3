use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::client::{Request, SharedClient};
use crate::stream::{
    ByteSource, ByteStream, DEFAULT_READ_SIZE, PullMode, SeekStrategy, StreamError, StreamResult,
};

use super::{RequestReadStream, RequestSource};

/// Response body that can be seeked anywhere, spooled to a temp file.
pub type SeekableRequestReadStream = ByteStream<SeekableRequestSource>;

/// Every byte pulled from the network is appended to an anonymous temp file;
/// reads below the spooled length are served from the file.
pub struct SeekableRequestSource {
    upstream: RequestReadStream,
    spool: File,
    spooled: u64,
    position: u64,
}

impl SeekableRequestSource {
    pub fn open(
        client: &SharedClient,
        request: Arc<Request>,
    ) -> StreamResult<SeekableRequestReadStream> {
        let upstream = RequestSource::open(client, request)?;
        Ok(ByteStream::new(Self::new(upstream)?))
    }

    pub fn new(upstream: RequestReadStream) -> StreamResult<Self> {
        Ok(Self {
            upstream,
            spool: tempfile::tempfile()?,
            spooled: 0,
            position: 0,
        })
    }

    pub fn upstream(&self) -> &RequestReadStream {
        &self.upstream
    }

    pub fn upstream_mut(&mut self) -> &mut RequestReadStream {
        &mut self.upstream
    }

    /// Bytes fetched from the network so far.
    pub fn spooled(&self) -> u64 {
        self.spooled
    }

    /// Pulls up to `max` new network bytes into the spool. Returns them too so
    /// sequential reads avoid a round trip through the file.
    fn spool_more(&mut self, max: usize) -> StreamResult<Vec<u8>> {
        let pulled = self
            .upstream
            .pull(max.min(DEFAULT_READ_SIZE), PullMode::NoMoreThan)?;
        if pulled == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.upstream.consume(pulled)?;
        self.spool.seek(SeekFrom::End(0))?;
        self.spool.write_all(&bytes)?;
        self.spooled += bytes.len() as u64;
        Ok(bytes)
    }

    fn spool_until(&mut self, offset: u64) -> StreamResult<()> {
        while self.spooled < offset {
            let wanted = (offset - self.spooled).min(DEFAULT_READ_SIZE as u64) as usize;
            if self.spool_more(wanted)?.is_empty() && self.upstream.reached_end_of_data() {
                return Err(StreamError::NotEnoughData {
                    requested: offset,
                    available: self.spooled,
                });
            }
        }
        Ok(())
    }

    fn read_spooled(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize> {
        let wanted = (self.spooled - self.position).min(max as u64) as usize;
        let start = out.len();
        out.resize(start + wanted, 0);
        self.spool.seek(SeekFrom::Start(self.position))?;
        if let Err(err) = self.spool.read_exact(&mut out[start..]) {
            out.truncate(start);
            return Err(err.into());
        }
        self.position += wanted as u64;
        Ok(wanted)
    }
}

impl ByteSource for SeekableRequestSource {
    fn read_more(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize> {
        if self.position < self.spooled {
            return self.read_spooled(out, max);
        }
        let bytes = self.spool_more(max)?;
        self.position += bytes.len() as u64;
        out.extend_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.spooled
            && self.upstream.available() == 0
            && self.upstream.source().is_exhausted()
    }

    /// Waits for the response headers, and drains the whole body when the
    /// server gave no usable Content-Length.
    fn length(&mut self) -> StreamResult<Option<u64>> {
        if let Some(length) = self.upstream.length()? {
            return Ok(Some(length));
        }
        while !self.upstream.reached_end_of_data() {
            if self.spool_more(DEFAULT_READ_SIZE)?.is_empty()
                && !self.upstream.reached_end_of_data()
            {
                return Err(StreamError::NotEnoughData {
                    requested: self.spooled + 1,
                    available: self.spooled,
                });
            }
        }
        Ok(Some(self.spooled))
    }

    fn seek_strategy(&self) -> SeekStrategy {
        SeekStrategy::RandomAccess
    }

    fn reposition(&mut self, offset: u64) -> StreamResult<()> {
        self.spool_until(offset)?;
        self.position = offset;
        Ok(())
    }

    fn close(&mut self) -> StreamResult<()> {
        self.upstream.close()
    }
}
