use std::io::Write;

use flate2::Compression;
use flate2::write::{
    DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder,
};

use super::ByteTransformer;
use crate::stream::{StreamError, StreamResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    /// Raw deflate without a zlib wrapper.
    Deflate,
    Zlib,
}

enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
    Zlib(ZlibEncoder<Vec<u8>>),
}

pub struct Compressor {
    encoder: Option<Encoder>,
}

impl Compressor {
    pub fn new(format: CompressionFormat) -> Self {
        Self::with_level(format, Compression::default())
    }

    pub fn with_level(format: CompressionFormat, level: Compression) -> Self {
        let encoder = match format {
            CompressionFormat::Gzip => Encoder::Gzip(GzEncoder::new(Vec::new(), level)),
            CompressionFormat::Deflate => Encoder::Deflate(DeflateEncoder::new(Vec::new(), level)),
            CompressionFormat::Zlib => Encoder::Zlib(ZlibEncoder::new(Vec::new(), level)),
        };
        Self {
            encoder: Some(encoder),
        }
    }
}

impl ByteTransformer for Compressor {
    fn filter_bytes(&mut self, chunk: &[u8]) -> StreamResult<Option<Vec<u8>>> {
        let out = match self.encoder.as_mut() {
            Some(Encoder::Gzip(enc)) => {
                enc.write_all(chunk)?;
                std::mem::take(enc.get_mut())
            }
            Some(Encoder::Deflate(enc)) => {
                enc.write_all(chunk)?;
                std::mem::take(enc.get_mut())
            }
            Some(Encoder::Zlib(enc)) => {
                enc.write_all(chunk)?;
                std::mem::take(enc.get_mut())
            }
            None => return Err(StreamError::TransformerFinished),
        };
        Ok((!out.is_empty()).then_some(out))
    }

    fn flush(&mut self) -> StreamResult<Vec<u8>> {
        let out = match self.encoder.take() {
            Some(Encoder::Gzip(enc)) => enc.finish()?,
            Some(Encoder::Deflate(enc)) => enc.finish()?,
            Some(Encoder::Zlib(enc)) => enc.finish()?,
            None => return Err(StreamError::TransformerFinished),
        };
        Ok(out)
    }
}

enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(DeflateDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
}

pub struct Decompressor {
    decoder: Option<Decoder>,
}

impl Decompressor {
    pub fn new(format: CompressionFormat) -> Self {
        let decoder = match format {
            CompressionFormat::Gzip => Decoder::Gzip(GzDecoder::new(Vec::new())),
            CompressionFormat::Deflate => Decoder::Deflate(DeflateDecoder::new(Vec::new())),
            CompressionFormat::Zlib => Decoder::Zlib(ZlibDecoder::new(Vec::new())),
        };
        Self {
            decoder: Some(decoder),
        }
    }
}

fn corrupt(err: std::io::Error) -> StreamError {
    StreamError::protocol(format!("corrupt compressed data: {err}"))
}

impl ByteTransformer for Decompressor {
    fn filter_bytes(&mut self, chunk: &[u8]) -> StreamResult<Option<Vec<u8>>> {
        let out = match self.decoder.as_mut() {
            Some(Decoder::Gzip(dec)) => {
                dec.write_all(chunk).map_err(corrupt)?;
                std::mem::take(dec.get_mut())
            }
            Some(Decoder::Deflate(dec)) => {
                dec.write_all(chunk).map_err(corrupt)?;
                std::mem::take(dec.get_mut())
            }
            Some(Decoder::Zlib(dec)) => {
                dec.write_all(chunk).map_err(corrupt)?;
                std::mem::take(dec.get_mut())
            }
            None => return Err(StreamError::TransformerFinished),
        };
        Ok((!out.is_empty()).then_some(out))
    }

    fn flush(&mut self) -> StreamResult<Vec<u8>> {
        let out = match self.decoder.take() {
            Some(Decoder::Gzip(dec)) => dec.finish().map_err(corrupt)?,
            Some(Decoder::Deflate(dec)) => dec.finish().map_err(corrupt)?,
            Some(Decoder::Zlib(dec)) => dec.finish().map_err(corrupt)?,
            None => return Err(StreamError::TransformerFinished),
        };
        Ok(out)
    }
}
