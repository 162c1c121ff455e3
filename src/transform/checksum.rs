use sha1::{Digest, Sha1};

use super::ByteTransformer;
use crate::stream::{StreamError, StreamResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha1,
    Blake3,
}

enum Hasher {
    Sha1(Sha1),
    Blake3(Box<blake3::Hasher>),
}

/// Passes bytes through unchanged while hashing them. When `emit_digest` is
/// set, the lowercase hex digest is appended to the output on flush.
pub struct ChecksumTransformer {
    hasher: Option<Hasher>,
    emit_digest: bool,
    digest: Option<String>,
}

impl ChecksumTransformer {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let hasher = match algorithm {
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self {
            hasher: Some(hasher),
            emit_digest: false,
            digest: None,
        }
    }

    pub fn emitting_digest(mut self) -> Self {
        self.emit_digest = true;
        self
    }

    /// Hex digest, available after flush.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl ByteTransformer for ChecksumTransformer {
    fn filter_bytes(&mut self, chunk: &[u8]) -> StreamResult<Option<Vec<u8>>> {
        match self.hasher.as_mut() {
            Some(Hasher::Sha1(hasher)) => hasher.update(chunk),
            Some(Hasher::Blake3(hasher)) => {
                hasher.update(chunk);
            }
            None => return Err(StreamError::TransformerFinished),
        }
        Ok(Some(chunk.to_vec()))
    }

    fn flush(&mut self) -> StreamResult<Vec<u8>> {
        let digest = match self.hasher.take() {
            Some(Hasher::Sha1(hasher)) => hex::encode(hasher.finalize()),
            Some(Hasher::Blake3(hasher)) => hasher.finalize().to_hex().to_string(),
            None => return Err(StreamError::TransformerFinished),
        };
        let out = if self.emit_digest {
            digest.clone().into_bytes()
        } else {
            Vec::new()
        };
        self.digest = Some(digest);
        Ok(out)
    }
}
