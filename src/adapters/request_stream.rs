use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use tracing::{error, trace};

use crate::client::{ClientError, EventKind, Request, RequestFilter, Response, SharedClient};
use crate::stream::{ByteSource, ByteStream, SeekStrategy, StreamError, StreamResult};

/// Response body of one request as a forward-only byte stream.
pub type RequestReadStream = ByteStream<RequestSource>;

/// Drives the shared client until events for its request arrive. Only events
/// of this request (and its redirect hops) are consumed; other requests keep
/// their events queued below.
pub struct RequestSource {
    client: SharedClient,
    request: Arc<Request>,
    response: Option<Response>,
    pending: VecDeque<Bytes>,
    received: u64,
    finished: bool,
    failure: Option<ClientError>,
}

impl RequestSource {
    /// Enqueues `request` and wraps its response body in a stream.
    pub fn open(client: &SharedClient, request: Arc<Request>) -> StreamResult<RequestReadStream> {
        client.lock().enqueue(&request)?;
        Ok(ByteStream::new(Self::attach(client, request)))
    }

    /// Source for a request that was already enqueued on `client`.
    pub fn attach(client: &SharedClient, request: Arc<Request>) -> Self {
        Self {
            client: Arc::clone(client),
            request,
            response: None,
            pending: VecDeque::new(),
            received: 0,
            finished: false,
            failure: None,
        }
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// True once the terminal event of the request was observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Blocks until the final response's headers are available.
    pub fn await_response(&mut self) -> StreamResult<Response> {
        loop {
            if let Some(response) = &self.response {
                return Ok(response.clone());
            }
            self.check_failure()?;
            if self.finished {
                return Err(StreamError::Transport(
                    "request finished without a response".into(),
                ));
            }
            self.drive_once()?;
        }
    }

    /// Processes one client event for this request.
    fn drive_once(&mut self) -> StreamResult<()> {
        let filter = RequestFilter::single(&self.request);
        let mut client = self.client.lock();
        if !client.await_next_event(&filter)? {
            self.finished = true;
            if self.failure.is_none() && !self.request.state().is_terminal() {
                self.failure = Some(ClientError::transport(
                    "request ended without a terminal event",
                ));
            }
            return Ok(());
        }

        match client.event() {
            Some(EventKind::GotHeaders) => {
                self.response = client.request().and_then(|current| current.response());
            }
            Some(EventKind::BodyChunkAvailable) => {
                if let Some(chunk) = client.take_body_chunk()
                    && !chunk.is_empty()
                {
                    self.pending.push_back(chunk);
                }
            }
            Some(EventKind::Finished) => {
                trace!(request = %self.request.id(), bytes = self.received, "request stream finished");
                self.finished = true;
            }
            Some(EventKind::Failed) => {
                self.finished = true;
                let error = client
                    .request()
                    .and_then(|current| current.error())
                    .or_else(|| self.request.error())
                    .unwrap_or_else(|| ClientError::transport("request failed"));
                self.failure = Some(error);
            }
            None => {}
        }
        Ok(())
    }

    fn check_failure(&self) -> StreamResult<()> {
        match &self.failure {
            Some(error) => Err(error.clone().into()),
            None => Ok(()),
        }
    }

    fn pending_len(&self) -> u64 {
        self.pending.iter().map(|chunk| chunk.len() as u64).sum()
    }

    /// Every byte the response declared has been handed out.
    fn body_complete(&self) -> bool {
        let Some(response) = &self.response else {
            return false;
        };
        if self.request.method() == Method::HEAD {
            return true;
        }
        !response.headers().contains_key(http::header::CONTENT_ENCODING)
            && response.content_length() == Some(self.received)
    }

    /// Consumes the terminal event that trails a complete body. Readers stop
    /// at the declared length and would otherwise never observe it.
    fn settle_complete_body(&mut self) -> StreamResult<()> {
        while !self.finished && self.pending.is_empty() && self.body_complete() {
            self.drive_once()?;
        }
        Ok(())
    }
}

impl ByteSource for RequestSource {
    fn read_more(&mut self, out: &mut Vec<u8>, max: usize) -> StreamResult<usize> {
        loop {
            if let Some(chunk) = self.pending.front_mut() {
                let take = max.min(chunk.len());
                out.extend_from_slice(&chunk.split_to(take));
                if chunk.is_empty() {
                    self.pending.pop_front();
                }
                self.received += take as u64;
                return Ok(take);
            }
            self.check_failure()?;
            if self.finished {
                return Ok(0);
            }
            self.drive_once()?;
        }
    }

    fn is_exhausted(&self) -> bool {
        self.finished && self.pending.is_empty() && self.failure.is_none()
    }

    /// Content-Length describes the encoded body, so it is only trusted when
    /// no Content-Encoding applies. Otherwise the length is known once the
    /// transfer completed.
    fn length(&mut self) -> StreamResult<Option<u64>> {
        if self.response.is_none() && !self.finished {
            self.await_response()?;
        }
        if self.request.method() == Method::HEAD {
            return Ok(Some(0));
        }
        if let Some(response) = &self.response
            && !response.headers().contains_key(http::header::CONTENT_ENCODING)
            && let Some(length) = response.content_length()
        {
            return Ok(Some(length));
        }
        if self.finished && self.failure.is_none() {
            return Ok(Some(self.received + self.pending_len()));
        }
        Ok(None)
    }

    fn seek_strategy(&self) -> SeekStrategy {
        SeekStrategy::ForwardOnly
    }

    fn close(&mut self) -> StreamResult<()> {
        self.settle_complete_body()?;
        if self.finished {
            return Ok(());
        }
        Err(StreamError::CancellationUnsupported)
    }
}

impl Drop for RequestSource {
    fn drop(&mut self) {
        if !self.finished && self.settle_complete_body().is_err() {
            trace!(request = %self.request.id(), "failed to settle request on drop");
        }
        if !self.finished {
            error!(
                request = %self.request.id(),
                url = %self.request.url(),
                "request stream dropped before its response finished; cancellation is unsupported"
            );
        }
    }
}
