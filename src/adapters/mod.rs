//! Bridges from the event-driven client to pull-based byte streams.

mod request_stream;
mod seekable;

pub use request_stream::{RequestReadStream, RequestSource};
pub use seekable::{SeekableRequestReadStream, SeekableRequestSource};

use crate::client::ClientError;
use crate::stream::StreamError;

impl From<ClientError> for StreamError {
    fn from(err: ClientError) -> Self {
        StreamError::Transport(err.to_string())
    }
}
