use super::ByteTransformer;
use crate::stream::{
    ByteSource, ByteStream, DEFAULT_READ_SIZE, PullMode, SeekStrategy, StreamError, StreamResult,
};

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_LINE_LENGTH: usize = 4096;
/// Significant hex digits of a chunk size; leading zeros do not count.
const MAX_CHUNK_SIZE_DIGITS: usize = 16;

/// Frames every non-empty write as one chunk.
#[derive(Debug, Default)]
pub struct ChunkedEncoder {
    finished: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteTransformer for ChunkedEncoder {
    fn filter_bytes(&mut self, chunk: &[u8]) -> StreamResult<Option<Vec<u8>>> {
        if self.finished {
            return Err(StreamError::TransformerFinished);
        }
        if chunk.is_empty() {
            return Ok(None);
        }
        let mut out = format!("{:x}\r\n", chunk.len()).into_bytes();
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
        Ok(Some(out))
    }

    fn flush(&mut self) -> StreamResult<Vec<u8>> {
        if self.finished {
            return Err(StreamError::TransformerFinished);
        }
        self.finished = true;
        Ok(b"0\r\n\r\n".to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkedState {
    ScanChunkSize,
    ScanChunkData,
    ScanChunkTrailer,
    /// Terminal: the zero-size chunk was seen.
    ScanFinalChunk,
}

/// Source decoding `Transfer-Encoding: chunked` framing from an upstream stream.
pub struct ChunkedDecoder<U> {
    upstream: ByteStream<U>,
    state: ChunkedState,
    remaining: u64,
}

impl<U: ByteSource> ChunkedDecoder<U> {
    pub fn new(upstream: ByteStream<U>) -> Self {
        Self {
            upstream,
            state: ChunkedState::ScanChunkSize,
            remaining: 0,
        }
    }

    pub fn state(&self) -> ChunkedState {
        self.state
    }

    pub fn upstream_mut(&mut self) -> &mut ByteStream<U> {
        &mut self.upstream
    }

    /// Position of the next CRLF within the buffered upstream bytes, pulling
    /// once if none is buffered yet.
    fn find_line_end(&mut self) -> StreamResult<Option<usize>> {
        if let Some(pos) = find_crlf(self.upstream.peek(MAX_CHUNK_LINE_LENGTH)) {
            return Ok(Some(pos));
        }
        self.upstream
            .pull(MAX_CHUNK_LINE_LENGTH, PullMode::NoMoreThan)?;
        let line = self.upstream.peek(MAX_CHUNK_LINE_LENGTH);
        if let Some(pos) = find_crlf(line) {
            return Ok(Some(pos));
        }
        if line.len() >= MAX_CHUNK_LINE_LENGTH {
            return Err(StreamError::protocol("chunk size line too long"));
        }
        Ok(None)
    }

    fn scan_chunk_size(&mut self) -> StreamResult<bool> {
        let Some(line_end) = self.find_line_end()? else {
            if self.upstream.reached_end_of_data() {
                return Err(StreamError::protocol("truncated chunk header"));
            }
            return Ok(false);
        };

        let line = self.upstream.peek(line_end);
        let digits = line.iter().take_while(|b| b.is_ascii_hexdigit()).count();
        if digits == 0 {
            return Err(StreamError::protocol("malformed chunk header"));
        }
        if digits < line_end && line[digits] != b';' {
            return Err(StreamError::protocol(
                "chunk size must be followed by CRLF or an extension",
            ));
        }
        let zeros = line[..digits].iter().take_while(|&&b| b == b'0').count();
        let significant = &line[zeros..digits];
        if significant.len() > MAX_CHUNK_SIZE_DIGITS {
            return Err(StreamError::protocol("chunk size overflows"));
        }
        let size = if significant.is_empty() {
            0
        } else {
            let text = std::str::from_utf8(significant)
                .map_err(|_| StreamError::protocol("malformed chunk header"))?;
            u64::from_str_radix(text, 16).map_err(|err| {
                StreamError::protocol(format!("invalid chunk size '{text}': {err}"))
            })?
        };
        self.upstream.consume(line_end + 2)?;

        if size == 0 {
            self.state = ChunkedState::ScanFinalChunk;
            self.drain_trailer_section()?;
        } else {
            self.remaining = size;
            self.state = ChunkedState::ScanChunkData;
        }
        Ok(true)
    }

    /// Trailer fields after the last chunk carry nothing the body needs; drop
    /// whatever of them is already reachable.
    fn drain_trailer_section(&mut self) -> StreamResult<()> {
        while let Some(line_end) = self.find_line_end()? {
            self.upstream.consume(line_end + 2)?;
            if line_end == 0 {
                break;
            }
        }
        Ok(())
    }

    fn scan_chunk_trailer(&mut self) -> StreamResult<bool> {
        if self.upstream.pull(2, PullMode::NoMoreThan)? < 2 {
            if self.upstream.reached_end_of_data() {
                return Err(StreamError::protocol("missing CRLF after chunk data"));
            }
            return Ok(false);
        }
        if self.upstream.peek(2) != b"\r\n" {
            return Err(StreamError::protocol("missing CRLF after chunk data"));
        }
        self.upstream.consume(2)?;
        self.state = ChunkedState::ScanChunkSize;
        Ok(true)
    }
}

impl<U: ByteSource> ByteSource for ChunkedDecoder<U> {
    fn read_more(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize> {
        loop {
            let progressed = match self.state {
                ChunkedState::ScanChunkSize => self.scan_chunk_size()?,
                ChunkedState::ScanChunkData => {
                    let want = self.remaining.min(DEFAULT_READ_SIZE as u64) as usize;
                    let want = want.min(max);
                    if want == 0 {
                        return Ok(0);
                    }
                    let pulled = self.upstream.pull(want, PullMode::NoMoreThan)?;
                    if pulled == 0 {
                        if self.upstream.reached_end_of_data() {
                            return Err(StreamError::protocol("truncated chunk data"));
                        }
                        return Ok(0);
                    }
                    out.extend(self.upstream.consume(pulled)?);
                    self.remaining -= pulled as u64;
                    if self.remaining == 0 {
                        self.state = ChunkedState::ScanChunkTrailer;
                    }
                    return Ok(pulled);
                }
                ChunkedState::ScanChunkTrailer => self.scan_chunk_trailer()?,
                ChunkedState::ScanFinalChunk => return Ok(0),
            };
            if !progressed {
                return Ok(0);
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.state == ChunkedState::ScanFinalChunk
    }

    fn seek_strategy(&self) -> SeekStrategy {
        SeekStrategy::ForwardOnly
    }

    fn close(&mut self) -> StreamResult<()> {
        self.upstream.close()
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|pair| pair == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryPipe, SliceSource};

    fn encode(parts: &[&[u8]]) -> StreamResult<Vec<u8>> {
        let mut encoder = ChunkedEncoder::new();
        let mut wire = Vec::new();
        for part in parts {
            if let Some(bytes) = encoder.filter_bytes(part)? {
                wire.extend(bytes);
            }
        }
        wire.extend(encoder.flush()?);
        Ok(wire)
    }

    fn decoder_over(wire: &[u8]) -> ByteStream<ChunkedDecoder<SliceSource>> {
        ByteStream::new(ChunkedDecoder::new(ByteStream::new(SliceSource::new(
            wire.to_vec(),
        ))))
    }

    #[test]
    fn encoder_frames_writes() -> StreamResult<()> {
        assert_eq!(
            encode(&[b"hello", b"", b" world, and then some"])?,
            b"5\r\nhello\r\n15\r\n world, and then some\r\n0\r\n\r\n"
        );
        Ok(())
    }

    #[test]
    fn round_trip_over_uneven_writes() -> StreamResult<()> {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let mut parts = Vec::new();
        let mut rest = payload.as_slice();
        let mut size = 1;
        while !rest.is_empty() {
            let take = size.min(rest.len());
            parts.push(&rest[..take]);
            rest = &rest[take..];
            size = size * 7 % 70_001 + 1;
        }
        let wire = encode(&parts)?;

        let mut stream = decoder_over(&wire);
        assert_eq!(stream.read_to_end()?, payload);
        assert_eq!(stream.source().state(), ChunkedState::ScanFinalChunk);
        Ok(())
    }

    #[test]
    fn extensions_and_trailers_are_skipped() -> StreamResult<()> {
        let wire = b"4;name=value\r\nWiki\r\n5\r\npedia\r\n0\r\nExpires: never\r\n\r\n";
        let mut stream = decoder_over(wire);
        assert_eq!(stream.read_to_end()?, b"Wikipedia");
        Ok(())
    }

    #[test]
    fn missing_size_is_malformed() {
        let mut stream = decoder_over(b"\r\nabc\r\n0\r\n\r\n");
        let err = stream.read_to_end().unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)), "got {err}");
    }

    #[test]
    fn leading_zeros_do_not_count_toward_size_digits() -> StreamResult<()> {
        let mut stream =
            decoder_over(b"00000000000000000a\r\n0123456789\r\n000000000000000000\r\n\r\n");
        assert_eq!(stream.read_to_end()?, b"0123456789");
        Ok(())
    }

    #[test]
    fn oversized_chunk_size_overflows() {
        let mut stream = decoder_over(b"10000000000000000\r\nabc\r\n0\r\n\r\n");
        assert!(matches!(
            stream.read_to_end(),
            Err(StreamError::Protocol(message)) if message.contains("overflows")
        ));
    }

    #[test]
    fn garbage_after_size_is_malformed() {
        let mut stream = decoder_over(b"3 x\r\nabc\r\n0\r\n\r\n");
        assert!(matches!(
            stream.read_to_end(),
            Err(StreamError::Protocol(_))
        ));
    }

    #[test]
    fn missing_data_crlf_is_malformed() {
        let mut stream = decoder_over(b"3\r\nabcXY0\r\n\r\n");
        assert!(matches!(
            stream.read_to_end(),
            Err(StreamError::Protocol(_))
        ));
    }

    #[test]
    fn truncated_body_is_malformed() {
        let mut stream = decoder_over(b"a\r\nabc");
        assert!(matches!(
            stream.read_to_end(),
            Err(StreamError::Protocol(_))
        ));
    }

    #[test]
    fn waits_for_more_input_without_failing() -> StreamResult<()> {
        let mut pipe = MemoryPipe::new();
        pipe.append(b"5\r\nhel")?;
        let mut stream = ByteStream::new(ChunkedDecoder::new(ByteStream::new(pipe)));

        assert_eq!(stream.pull(5, PullMode::NoMoreThan)?, 3);
        assert_eq!(stream.consume(3)?, b"hel");
        assert_eq!(stream.pull(5, PullMode::NoMoreThan)?, 0);
        assert!(!stream.reached_end_of_data());

        let pipe = stream.source_mut().upstream_mut().source_mut();
        pipe.append(b"lo\r\n0\r\n\r\n")?;
        pipe.close_writing();
        assert_eq!(stream.read_to_end()?, b"lo");
        assert!(stream.reached_end_of_data());
        Ok(())
    }
}
