use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use url::Url;

use super::ClientError;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Enqueued,
    InProgress,
    Finished,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    request: Weak<Request>,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, request: &Arc<Request>) -> Self {
        Self {
            status,
            headers,
            request: Arc::downgrade(request),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_str(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn request(&self) -> Option<Arc<Request>> {
        self.request.upgrade()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header_str(http::header::CONTENT_LENGTH)
            .and_then(|value| value.trim().parse().ok())
    }
}

#[derive(Debug)]
struct RequestProgress {
    headers: HeaderMap,
    state: RequestState,
    response: Option<Response>,
    redirected_to: Option<Arc<Request>>,
    cache_key: Option<String>,
    error: Option<ClientError>,
    transport_detached: bool,
}

/// One HTTP exchange. Shared between the caller and every client layer; the
/// mutable part sits behind a lock and only the client mutates it.
pub struct Request {
    id: RequestId,
    method: Method,
    url: Url,
    body: Option<Bytes>,
    redirected_from: Option<Weak<Request>>,
    /// Ids of every earlier hop, oldest first. Kept by value so the chain
    /// depth survives the earlier hops being dropped.
    ancestors: Vec<RequestId>,
    progress: Mutex<RequestProgress>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl Request {
    pub fn builder(method: Method, url: Url) -> RequestBuilder {
        RequestBuilder {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            redirected_from: None,
            ancestors: Vec::new(),
        }
    }

    pub fn get(url: &str) -> Result<Arc<Request>, ClientError> {
        let parsed = Url::parse(url).map_err(|err| ClientError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self::builder(Method::GET, parsed).build())
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> HeaderMap {
        self.progress.lock().headers.clone()
    }

    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<HeaderValue> {
        self.progress.lock().headers.get(name).cloned()
    }

    pub fn state(&self) -> RequestState {
        self.progress.lock().state
    }

    pub fn response(&self) -> Option<Response> {
        self.progress.lock().response.clone()
    }

    pub fn error(&self) -> Option<ClientError> {
        self.progress.lock().error.clone()
    }

    pub fn cache_key(&self) -> Option<String> {
        self.progress.lock().cache_key.clone()
    }

    pub fn redirected_from(&self) -> Option<Arc<Request>> {
        self.redirected_from.as_ref().and_then(Weak::upgrade)
    }

    pub fn redirected_to(&self) -> Option<Arc<Request>> {
        self.progress.lock().redirected_to.clone()
    }

    /// Newest member of the redirect chain starting here.
    pub fn latest_redirect(self: &Arc<Self>) -> Arc<Request> {
        let mut current = Arc::clone(self);
        while let Some(next) = current.redirected_to() {
            current = next;
        }
        current
    }

    /// Root of the redirect chain this request belongs to.
    pub fn original_request(self: &Arc<Self>) -> Arc<Request> {
        let mut current = Arc::clone(self);
        while let Some(previous) = current.redirected_from() {
            current = previous;
        }
        current
    }

    /// Number of redirects that led to this request.
    pub fn redirect_count(&self) -> usize {
        self.ancestors.len()
    }

    /// Whether `id` is this request or one it was redirected from.
    pub fn belongs_to(&self, id: RequestId) -> bool {
        self.id == id || self.ancestors.contains(&id)
    }

    pub(crate) fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.progress.lock().headers.insert(name, value);
    }

    pub(crate) fn mark_in_progress(&self) {
        let mut progress = self.progress.lock();
        if progress.state == RequestState::Enqueued {
            progress.state = RequestState::InProgress;
        }
    }

    pub(crate) fn set_response(&self, response: Response) {
        let mut progress = self.progress.lock();
        if !progress.state.is_terminal() {
            progress.response = Some(response);
        }
    }

    /// Returns false when the request had already terminated.
    pub(crate) fn finish(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.state.is_terminal() {
            return false;
        }
        progress.state = RequestState::Finished;
        true
    }

    pub(crate) fn fail(&self, error: ClientError) -> bool {
        let mut progress = self.progress.lock();
        if progress.state.is_terminal() {
            return false;
        }
        progress.state = RequestState::Failed;
        progress.error = Some(error);
        true
    }

    /// Terminal transition driven by the network transfer. Ignored once the
    /// request was redirected or handed over to a cache replay.
    pub(crate) fn finish_transfer(&self) -> bool {
        if self.transfer_superseded() {
            return false;
        }
        self.finish()
    }

    pub(crate) fn fail_transfer(&self, error: ClientError) -> bool {
        if self.transfer_superseded() {
            return false;
        }
        self.fail(error)
    }

    fn transfer_superseded(&self) -> bool {
        let progress = self.progress.lock();
        progress.redirected_to.is_some() || progress.transport_detached
    }

    pub(crate) fn set_cache_key(&self, key: String) {
        self.progress.lock().cache_key = Some(key);
    }

    pub(crate) fn link_redirect(&self, next: Arc<Request>) {
        self.progress.lock().redirected_to = Some(next);
    }

    pub(crate) fn set_transport_detached(&self, detached: bool) {
        self.progress.lock().transport_detached = detached;
    }
}

pub struct RequestBuilder {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    redirected_from: Option<Weak<Request>>,
    ancestors: Vec<RequestId>,
}

impl RequestBuilder {
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn redirected_from(mut self, previous: &Arc<Request>) -> Self {
        self.redirected_from = Some(Arc::downgrade(previous));
        self.ancestors = previous.ancestors.clone();
        self.ancestors.push(previous.id);
        self
    }

    pub fn build(self) -> Arc<Request> {
        Arc::new(Request {
            id: RequestId::next(),
            method: self.method,
            url: self.url,
            body: self.body,
            redirected_from: self.redirected_from,
            ancestors: self.ancestors,
            progress: Mutex::new(RequestProgress {
                headers: self.headers,
                state: RequestState::Enqueued,
                response: None,
                redirected_to: None,
                cache_key: None,
                error: None,
                transport_detached: false,
            }),
        })
    }
}
