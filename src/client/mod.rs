//! Event-driven HTTP client.
//!
//! Every layer of the client (the core and each middleware) implements
//! [`ClientLayer`]: requests are enqueued without blocking and progress is
//! observed by polling `await_next_event`, then reading the current event
//! through the accessors. Multiplexing is interleaved event delivery over many
//! tracked requests; there are no threads in this layer.

pub mod codec;
mod core;
mod error;
mod request;
pub mod tcp;
mod transport;

use std::sync::Arc;

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

pub use self::core::ClientCore;
pub use error::ClientError;
pub use request::{Request, RequestBuilder, RequestId, RequestState, Response};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use transport::{Transport, TransportEvent};

use crate::middleware::{CacheConfig, CacheMiddleware, RedirectMiddleware};

pub const DEFAULT_MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Status and headers are attached to the request; the body has not been
    /// read yet.
    GotHeaders,
    BodyChunkAvailable,
    Finished,
    Failed,
}

impl EventKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Which requests an `await_next_event` call is interested in. A request
/// matches when it, or any request it was redirected from, is in the set. An
/// empty filter matches every request.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    ids: Vec<RequestId>,
}

impl RequestFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn single(request: &Arc<Request>) -> Self {
        Self {
            ids: vec![request.id()],
        }
    }

    pub fn ids(&self) -> &[RequestId] {
        &self.ids
    }

    pub fn matches(&self, request: &Arc<Request>) -> bool {
        if self.ids.is_empty() {
            return true;
        }
        self.ids.iter().any(|id| request.belongs_to(*id))
    }
}

/// Poll contract shared by the client core and every middleware.
pub trait ClientLayer: Send {
    fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError>;

    /// Blocks until the next event for a request matching `filter`. Returns
    /// false once no matching request has events left.
    fn await_next_event(&mut self, filter: &RequestFilter) -> Result<bool, ClientError>;

    fn event(&self) -> Option<EventKind>;

    fn request(&self) -> Option<Arc<Request>>;

    /// The chunk of the current `BodyChunkAvailable` event.
    fn take_body_chunk(&mut self) -> Option<Bytes>;
}

impl<L: ClientLayer + ?Sized> ClientLayer for Box<L> {
    fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError> {
        (**self).enqueue(request)
    }

    fn await_next_event(&mut self, filter: &RequestFilter) -> Result<bool, ClientError> {
        (**self).await_next_event(filter)
    }

    fn event(&self) -> Option<EventKind> {
        (**self).event()
    }

    fn request(&self) -> Option<Arc<Request>> {
        (**self).request()
    }

    fn take_body_chunk(&mut self) -> Option<Bytes> {
        (**self).take_body_chunk()
    }
}

/// A composed middleware chain.
pub struct Client {
    chain: Box<dyn ClientLayer>,
}

/// One client driven by several consumers, e.g. read streams.
pub type SharedClient = Arc<Mutex<Client>>;

impl Client {
    pub fn builder<T: Transport + 'static>(transport: T) -> ClientBuilder<T> {
        ClientBuilder::new(transport)
    }

    pub fn from_layer(chain: Box<dyn ClientLayer>) -> Self {
        Self { chain }
    }

    pub fn into_shared(self) -> SharedClient {
        Arc::new(Mutex::new(self))
    }

    pub fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError> {
        self.chain.enqueue(request)
    }

    pub fn await_next_event(&mut self, filter: &RequestFilter) -> Result<bool, ClientError> {
        self.chain.await_next_event(filter)
    }

    pub fn event(&self) -> Option<EventKind> {
        self.chain.event()
    }

    pub fn request(&self) -> Option<Arc<Request>> {
        self.chain.request()
    }

    pub fn take_body_chunk(&mut self) -> Option<Bytes> {
        self.chain.take_body_chunk()
    }

    /// Enqueues `request` and drives it to completion, buffering the body.
    pub fn fetch(&mut self, request: &Arc<Request>) -> Result<(Response, Bytes), ClientError> {
        self.enqueue(request)?;
        let filter = RequestFilter::single(request);
        let mut response = None;
        let mut body = BytesMut::new();
        while self.await_next_event(&filter)? {
            match self.event() {
                Some(EventKind::GotHeaders) => {
                    response = self.request().and_then(|current| current.response());
                }
                Some(EventKind::BodyChunkAvailable) => {
                    if let Some(chunk) = self.take_body_chunk() {
                        body.extend_from_slice(&chunk);
                    }
                }
                Some(EventKind::Finished) => {
                    return response.map(|response| (response, body.freeze())).ok_or_else(
                        || ClientError::transport("request finished without a response"),
                    );
                }
                Some(EventKind::Failed) => {
                    let error = self
                        .request()
                        .and_then(|current| current.error())
                        .or_else(|| request.error());
                    return Err(error.unwrap_or_else(|| ClientError::transport("request failed")));
                }
                None => {}
            }
        }
        Err(ClientError::transport(
            "request ended without a terminal event",
        ))
    }
}

/// Composes `RedirectMiddleware -> CacheMiddleware -> ClientCore -> transport`.
pub struct ClientBuilder<T> {
    transport: T,
    cache: Option<CacheConfig>,
    follow_redirects: bool,
    max_redirects: usize,
}

impl<T: Transport + 'static> ClientBuilder<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            cache: None,
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn build(self) -> Result<Client> {
        let mut chain: Box<dyn ClientLayer> = Box::new(ClientCore::new(self.transport));
        if let Some(config) = self.cache {
            chain = Box::new(CacheMiddleware::new(chain, config)?);
        }
        if self.follow_redirects {
            chain = Box::new(RedirectMiddleware::new(chain, self.max_redirects));
        }
        Ok(Client::from_layer(chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn filter_matches_through_redirect_chain() -> Result<(), ClientError> {
        let original = Request::get("http://example.test/a")?;
        let hop = Request::builder(Method::GET, url::Url::parse("http://example.test/b").unwrap())
            .redirected_from(&original)
            .build();
        let unrelated = Request::get("http://example.test/c")?;

        let filter = RequestFilter::single(&original);
        assert!(filter.matches(&original));
        assert!(filter.matches(&hop));
        assert!(!filter.matches(&unrelated));
        assert!(RequestFilter::any().matches(&unrelated));
        Ok(())
    }
}
