use std::io;

use thiserror::Error;

/// Failures surfaced by byte streams, their sources and transformers.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Malformed framing or a violated buffer invariant. Fatal to the stream.
    #[error("stream protocol error: {0}")]
    Protocol(String),
    #[error("invalid pull size {0}")]
    InvalidPullSize(usize),
    /// The requested bytes are not (or no longer) reachable. Callers may fall back
    /// to another strategy, e.g. re-fetching instead of seeking.
    #[error("not enough data: wanted {requested}, reachable {available}")]
    NotEnoughData { requested: u64, available: u64 },
    #[error("transformer used after it was flushed")]
    TransformerFinished,
    #[error("closing a request stream before its response finished is not supported")]
    CancellationUnsupported,
    #[error("stream is closed")]
    Closed,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StreamError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn is_not_enough_data(&self) -> bool {
        matches!(self, Self::NotEnoughData { .. })
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(err) => err,
            StreamError::NotEnoughData { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::other(other),
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
