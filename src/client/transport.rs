use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use super::{ClientError, Request, RequestId};

/// Progress reported by a transport engine for one request.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Headers { status: StatusCode, headers: HeaderMap },
    BodyChunk(Bytes),
    Finished,
    Failed(String),
}

/// The engine that actually moves bytes. The client core drives it through
/// this poll interface and never touches sockets itself.
pub trait Transport: Send {
    fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError>;

    /// Blocks until an event for one of `ids` is ready. Returns false when none
    /// of them has anything left to report.
    fn await_next_event(&mut self, ids: &[RequestId]) -> Result<bool, ClientError>;

    /// The event that made the last `await_next_event` return true.
    fn take_event(&mut self) -> Option<(RequestId, TransportEvent)>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError> {
        (**self).enqueue(request)
    }

    fn await_next_event(&mut self, ids: &[RequestId]) -> Result<bool, ClientError> {
        (**self).await_next_event(ids)
    }

    fn take_event(&mut self) -> Option<(RequestId, TransportEvent)> {
        (**self).take_event()
    }
}
