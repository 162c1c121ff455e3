use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;

use streamfetch::client::{ClientError, Request, RequestId, Transport, TransportEvent};

/// Canned answer for one URL.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    status: StatusCode,
    headers: Vec<(String, String)>,
    chunks: Vec<Bytes>,
    failure: Option<String>,
    connect_failure: bool,
}

impl ScriptedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: Vec::new(),
            chunks: Vec::new(),
            failure: None,
            connect_failure: false,
        }
    }

    pub fn ok(body: &str) -> Self {
        Self::new(200).body(body)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status).header("location", location)
    }

    /// Fails before any headers arrive.
    pub fn unreachable(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            connect_failure: true,
            ..Self::new(200)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Single-chunk body with a matching Content-Length.
    pub fn body(self, body: &str) -> Self {
        let length = body.len().to_string();
        self.header("content-length", &length)
            .chunks(&[body.as_bytes()])
    }

    pub fn chunks(mut self, chunks: &[&[u8]]) -> Self {
        self.chunks = chunks
            .iter()
            .map(|chunk| Bytes::copy_from_slice(chunk))
            .collect();
        self
    }

    /// Fails after the headers and chunks were delivered.
    pub fn failing_with(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    fn events(&self) -> VecDeque<TransportEvent> {
        let mut events = VecDeque::new();
        if self.connect_failure {
            events.push_back(TransportEvent::Failed(
                self.failure.clone().unwrap_or_default(),
            ));
            return events;
        }
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        events.push_back(TransportEvent::Headers {
            status: self.status,
            headers,
        });
        for chunk in &self.chunks {
            events.push_back(TransportEvent::BodyChunk(chunk.clone()));
        }
        match &self.failure {
            Some(message) => events.push_back(TransportEvent::Failed(message.clone())),
            None => events.push_back(TransportEvent::Finished),
        }
        events
    }
}

/// What the transport saw for one enqueued request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub id: RequestId,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Default)]
struct ScriptState {
    routes: HashMap<String, VecDeque<ScriptedResponse>>,
    recorded: Vec<RecordedRequest>,
    queues: HashMap<RequestId, VecDeque<TransportEvent>>,
}

/// In-process origin. Each URL answers with its queued responses in order and
/// keeps repeating the last one.
#[derive(Clone, Default)]
pub struct ScriptedServer {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, response: ScriptedResponse) -> &Self {
        self.state
            .lock()
            .routes
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn transport(&self) -> ScriptedTransport {
        ScriptedTransport {
            state: Arc::clone(&self.state),
            ready: None,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().recorded.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().recorded.len()
    }

    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url == url)
            .collect()
    }
}

pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
    ready: Option<(RequestId, TransportEvent)>,
}

impl Transport for ScriptedTransport {
    fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if state.queues.contains_key(&request.id()) {
            return Err(ClientError::AlreadyEnqueued(request.id()));
        }
        let url = request.url().to_string();
        state.recorded.push(RecordedRequest {
            id: request.id(),
            method: request.method().clone(),
            url: url.clone(),
            headers: request.headers(),
        });

        let response = match state.routes.get_mut(&url) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        let events = match response {
            Some(response) => response.events(),
            None => VecDeque::from([TransportEvent::Failed(format!("no route for {url}"))]),
        };
        state.queues.insert(request.id(), events);
        Ok(())
    }

    fn await_next_event(&mut self, ids: &[RequestId]) -> Result<bool, ClientError> {
        self.ready = None;
        let mut state = self.state.lock();
        for id in ids {
            let Some(queue) = state.queues.get_mut(id) else {
                continue;
            };
            if let Some(event) = queue.pop_front() {
                self.ready = Some((*id, event));
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn take_event(&mut self) -> Option<(RequestId, TransportEvent)> {
        self.ready.take()
    }
}
