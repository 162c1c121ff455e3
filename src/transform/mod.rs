//! Byte transformers and the decorators that compose them.
//!
//! A transformer may return `None` from `filter_bytes` to hold output back; the
//! pipeline simply moves on. `flush` finalizes the transformer and its trailing
//! output is fed through every transformer after it.

mod checksum;
mod chunked;
mod deflate;

use std::io::{self, Write};

pub use checksum::{ChecksumAlgorithm, ChecksumTransformer};
pub use chunked::{ChunkedDecoder, ChunkedEncoder, ChunkedState};
pub use deflate::{CompressionFormat, Compressor, Decompressor};

use crate::stream::{
    ByteSource, ByteStream, DEFAULT_READ_SIZE, PullMode, StreamError, StreamResult,
};

pub trait ByteTransformer: Send {
    fn filter_bytes(&mut self, chunk: &[u8]) -> StreamResult<Option<Vec<u8>>>;

    fn flush(&mut self) -> StreamResult<Vec<u8>>;
}

pub type TransformerChain = Vec<Box<dyn ByteTransformer>>;

fn apply_from(
    transformers: &mut [Box<dyn ByteTransformer>],
    start: usize,
    input: &[u8],
) -> StreamResult<Option<Vec<u8>>> {
    let mut current = input.to_vec();
    for transformer in transformers.iter_mut().skip(start) {
        match transformer.filter_bytes(&current)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn flush_all(transformers: &mut [Box<dyn ByteTransformer>]) -> StreamResult<Vec<u8>> {
    let mut out = Vec::new();
    for index in 0..transformers.len() {
        let tail = transformers[index].flush()?;
        if tail.is_empty() {
            continue;
        }
        if let Some(bytes) = apply_from(transformers, index + 1, &tail)? {
            out.extend(bytes);
        }
    }
    Ok(out)
}

/// Applies transformers, in order, to everything written through it.
pub struct TransformWriter<W: Write> {
    inner: W,
    transformers: TransformerChain,
    finished: bool,
}

impl<W: Write> TransformWriter<W> {
    pub fn new(inner: W, transformers: TransformerChain) -> Self {
        Self {
            inner,
            transformers,
            finished: false,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Flushes every transformer, writes the trailing output and returns the
    /// inner writer.
    pub fn finish(mut self) -> StreamResult<W> {
        self.finished = true;
        let tail = flush_all(&mut self.transformers)?;
        if !tail.is_empty() {
            self.inner.write_all(&tail)?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for TransformWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(StreamError::TransformerFinished.into());
        }
        if let Some(out) = apply_from(&mut self.transformers, 0, buf)? {
            self.inner.write_all(&out)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Read-side decorator: a source producing the transformed bytes of an
/// upstream stream.
pub struct TransformSource<U: ByteSource> {
    upstream: ByteStream<U>,
    transformers: TransformerChain,
    pending: Vec<u8>,
    flushed: bool,
}

impl<U: ByteSource> TransformSource<U> {
    pub fn new(upstream: ByteStream<U>, transformers: TransformerChain) -> Self {
        Self {
            upstream,
            transformers,
            pending: Vec::new(),
            flushed: false,
        }
    }

    pub fn upstream(&self) -> &ByteStream<U> {
        &self.upstream
    }
}

impl<U: ByteSource> ByteSource for TransformSource<U> {
    fn read_more(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize> {
        loop {
            if !self.pending.is_empty() {
                let take = max.min(self.pending.len());
                out.extend(self.pending.drain(..take));
                return Ok(take);
            }
            if self.flushed {
                return Ok(0);
            }
            let pulled = self.upstream.pull(DEFAULT_READ_SIZE, PullMode::NoMoreThan)?;
            if pulled > 0 {
                let chunk = self.upstream.consume(pulled)?;
                if let Some(bytes) = apply_from(&mut self.transformers, 0, &chunk)? {
                    self.pending.extend(bytes);
                }
                continue;
            }
            if self.upstream.reached_end_of_data() {
                let tail = flush_all(&mut self.transformers)?;
                self.pending.extend(tail);
                self.flushed = true;
                continue;
            }
            return Ok(0);
        }
    }

    fn is_exhausted(&self) -> bool {
        self.flushed && self.pending.is_empty()
    }

    fn close(&mut self) -> StreamResult<()> {
        self.upstream.close()
    }
}

#[cfg(feature = "fuzzing")]
pub mod fuzzing {
    use crate::stream::{ByteStream, DEFAULT_READ_SIZE, MemoryPipe, PullMode, StreamResult};

    use super::ChunkedDecoder;

    /// Feeds `data` to a chunked decoder in pieces of `split` bytes, the way
    /// socket reads arrive, and collects the decoded body.
    pub fn decode_chunked_in_pieces(data: &[u8], split: usize) -> StreamResult<Vec<u8>> {
        let mut decoder =
            ByteStream::new(ChunkedDecoder::new(ByteStream::new(MemoryPipe::new())));
        let mut body = Vec::new();
        for piece in data.chunks(split.max(1)) {
            decoder
                .source_mut()
                .upstream_mut()
                .source_mut()
                .append(piece)?;
            drain(&mut decoder, &mut body)?;
        }
        decoder.source_mut().upstream_mut().source_mut().close_writing();
        drain(&mut decoder, &mut body)?;
        Ok(body)
    }

    fn drain(
        decoder: &mut ByteStream<ChunkedDecoder<MemoryPipe>>,
        body: &mut Vec<u8>,
    ) -> StreamResult<()> {
        loop {
            let pulled = decoder.pull(DEFAULT_READ_SIZE, PullMode::NoMoreThan)?;
            if pulled == 0 {
                return Ok(());
            }
            body.extend(decoder.consume(pulled)?);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SliceSource;

    /// Holds everything back until flush.
    struct Buffering {
        held: Vec<u8>,
    }

    impl ByteTransformer for Buffering {
        fn filter_bytes(&mut self, chunk: &[u8]) -> StreamResult<Option<Vec<u8>>> {
            self.held.extend_from_slice(chunk);
            Ok(None)
        }

        fn flush(&mut self) -> StreamResult<Vec<u8>> {
            Ok(std::mem::take(&mut self.held))
        }
    }

    #[test]
    fn suppressed_output_is_released_on_finish() -> StreamResult<()> {
        let mut writer = TransformWriter::new(
            Vec::new(),
            vec![
                Box::new(Buffering { held: Vec::new() }) as Box<dyn ByteTransformer>,
                Box::new(ChunkedEncoder::new()),
            ],
        );
        writer.write_all(b"abc")?;
        writer.write_all(b"de")?;
        assert!(writer.get_ref().is_empty());
        let out = writer.finish()?;
        assert_eq!(out, b"5\r\nabcde\r\n0\r\n\r\n");
        Ok(())
    }

    #[test]
    fn compress_then_chunk_round_trips_through_sources() -> StreamResult<()> {
        let payload = b"the quick brown fox jumps over the lazy dog ".repeat(50);
        let mut writer = TransformWriter::new(
            Vec::new(),
            vec![
                Box::new(Compressor::new(CompressionFormat::Gzip)) as Box<dyn ByteTransformer>,
                Box::new(ChunkedEncoder::new()),
            ],
        );
        for part in payload.chunks(97) {
            writer.write_all(part)?;
        }
        let wire = writer.finish()?;

        let dechunked = ByteStream::new(ChunkedDecoder::new(ByteStream::new(SliceSource::new(
            wire,
        ))));
        let mut decoded = ByteStream::new(TransformSource::new(
            dechunked,
            vec![Box::new(Decompressor::new(CompressionFormat::Gzip)) as Box<dyn ByteTransformer>],
        ));
        assert_eq!(decoded.read_to_end()?, payload);
        Ok(())
    }

    #[test]
    fn transformer_rejects_input_after_flush() {
        let mut encoder = ChunkedEncoder::new();
        assert!(encoder.flush().is_ok());
        assert!(matches!(
            encoder.filter_bytes(b"late"),
            Err(StreamError::TransformerFinished)
        ));
    }
}
