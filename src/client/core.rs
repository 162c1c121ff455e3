use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use super::{
    ClientError, ClientLayer, EventKind, Request, RequestFilter, RequestId, Response, Transport,
    TransportEvent,
};

/// Innermost layer: owns the in-flight requests and turns transport progress
/// into request state transitions and client events.
pub struct ClientCore<T> {
    transport: T,
    active: HashMap<RequestId, Arc<Request>>,
    current: Option<(EventKind, Arc<Request>)>,
    chunk: Option<Bytes>,
}

impl<T: Transport> ClientCore<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            active: HashMap::new(),
            current: None,
            chunk: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn active_requests(&self) -> usize {
        self.active.len()
    }

    fn tracked_ids(&self, filter: &RequestFilter) -> Vec<RequestId> {
        self.active
            .values()
            .filter(|request| filter.matches(request))
            .map(|request| request.id())
            .collect()
    }
}

impl<T: Transport> ClientLayer for ClientCore<T> {
    fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError> {
        if self.active.contains_key(&request.id()) {
            return Err(ClientError::AlreadyEnqueued(request.id()));
        }
        self.transport.enqueue(request)?;
        trace!(request = %request.id(), url = %request.url(), "request enqueued");
        self.active.insert(request.id(), Arc::clone(request));
        Ok(())
    }

    fn await_next_event(&mut self, filter: &RequestFilter) -> Result<bool, ClientError> {
        self.current = None;
        self.chunk = None;

        loop {
            let ids = self.tracked_ids(filter);
            if ids.is_empty() || !self.transport.await_next_event(&ids)? {
                return Ok(false);
            }
            let Some((id, event)) = self.transport.take_event() else {
                return Err(ClientError::transport(
                    "transport signalled an event but had none queued",
                ));
            };
            let Some(request) = self.active.get(&id).cloned() else {
                debug!(request = %id, "dropping event for untracked request");
                continue;
            };

            let kind = match event {
                TransportEvent::Headers { status, headers } => {
                    request.mark_in_progress();
                    request.set_response(Response::new(status, headers, &request));
                    EventKind::GotHeaders
                }
                TransportEvent::BodyChunk(bytes) => {
                    self.chunk = Some(bytes);
                    EventKind::BodyChunkAvailable
                }
                TransportEvent::Finished => {
                    self.active.remove(&id);
                    request.finish_transfer();
                    EventKind::Finished
                }
                TransportEvent::Failed(message) => {
                    self.active.remove(&id);
                    request.fail_transfer(ClientError::Transport(message));
                    EventKind::Failed
                }
            };
            self.current = Some((kind, request));
            return Ok(true);
        }
    }

    fn event(&self) -> Option<EventKind> {
        self.current.as_ref().map(|(kind, _)| *kind)
    }

    fn request(&self) -> Option<Arc<Request>> {
        self.current.as_ref().map(|(_, request)| Arc::clone(request))
    }

    fn take_body_chunk(&mut self) -> Option<Bytes> {
        self.chunk.take()
    }
}
