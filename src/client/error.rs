use thiserror::Error;

use super::RequestId;

/// Terminal request failures. Attached to the request and surfaced as a
/// `Failed` event; nothing in the client retries them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("too many redirects (limit {max})")]
    TooManyRedirects { max: usize },
    #[error("invalid redirect location '{location}'")]
    InvalidRedirectUrl { location: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request {0} was already enqueued")]
    AlreadyEnqueued(RequestId),
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}
