use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode, header};
use tracing::debug;

use crate::client::{ClientError, ClientLayer, EventKind, Request, RequestFilter, RequestId};
use crate::util::resolve_url;

/// Request headers that describe the original body or validate a specific
/// stored response and must not follow a redirect.
const NOT_FORWARDED: [header::HeaderName; 5] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
    header::IF_NONE_MATCH,
    header::IF_MODIFIED_SINCE,
];

/// Credentials only forwarded to the same origin.
const ORIGIN_BOUND: [header::HeaderName; 2] = [header::AUTHORIZATION, header::COOKIE];

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Follows `Location` redirects by enqueuing a linked follow-up request. Events
/// of superseded hops are swallowed so callers see one logical exchange.
pub struct RedirectMiddleware {
    next: Box<dyn ClientLayer>,
    max_redirects: usize,
    /// Requests that already failed here; their remaining events are dropped.
    abandoned: HashSet<RequestId>,
    current: Option<(EventKind, Arc<Request>)>,
    chunk: Option<Bytes>,
}

impl RedirectMiddleware {
    pub fn new(next: Box<dyn ClientLayer>, max_redirects: usize) -> Self {
        Self {
            next,
            max_redirects,
            abandoned: HashSet::new(),
            current: None,
            chunk: None,
        }
    }

    fn follow(&mut self, request: &Arc<Request>, location: &str) -> Result<(), ClientError> {
        if request.redirect_count() >= self.max_redirects {
            return Err(ClientError::TooManyRedirects {
                max: self.max_redirects,
            });
        }
        let target = resolve_url(location, request.url()).map_err(|_| {
            ClientError::InvalidRedirectUrl {
                location: location.to_string(),
            }
        })?;

        let mut headers = request.headers();
        for name in &NOT_FORWARDED {
            headers.remove(name);
        }
        let same_origin = target.origin() == request.url().origin();
        if !same_origin {
            for name in &ORIGIN_BOUND {
                headers.remove(name);
            }
        }

        let hop = Request::builder(Method::GET, target)
            .headers(headers)
            .redirected_from(request)
            .build();
        self.next.enqueue(&hop)?;
        debug!(
            from = %request.url(),
            to = %hop.url(),
            hop = hop.redirect_count(),
            "following redirect"
        );
        request.link_redirect(hop);
        Ok(())
    }

    /// Mirrors the terminal state of the final hop onto every earlier hop.
    fn settle_chain(request: &Arc<Request>) {
        let error = request.error();
        let mut previous = request.redirected_from();
        while let Some(hop) = previous {
            match &error {
                Some(error) => {
                    hop.fail(error.clone());
                }
                None => {
                    hop.finish();
                }
            }
            previous = hop.redirected_from();
        }
    }

    fn redirect_location(request: &Request) -> Option<String> {
        let response = request.response()?;
        if !is_redirect(response.status()) {
            return None;
        }
        response.header_str(header::LOCATION).map(str::to_string)
    }
}

impl ClientLayer for RedirectMiddleware {
    fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError> {
        self.next.enqueue(request)
    }

    fn await_next_event(&mut self, filter: &RequestFilter) -> Result<bool, ClientError> {
        self.current = None;
        self.chunk = None;

        loop {
            if !self.next.await_next_event(filter)? {
                return Ok(false);
            }
            let (Some(kind), Some(request)) = (self.next.event(), self.next.request()) else {
                continue;
            };
            let id = request.id();

            if self.abandoned.contains(&id) {
                if kind.is_terminal() {
                    self.abandoned.remove(&id);
                }
                continue;
            }
            if request.redirected_to().is_some() {
                continue;
            }

            if kind == EventKind::GotHeaders
                && let Some(location) = Self::redirect_location(&request)
            {
                match self.follow(&request, &location) {
                    Ok(()) => continue,
                    Err(error) => {
                        debug!(url = %request.url(), error = %error, "redirect failed");
                        request.fail(error);
                        Self::settle_chain(&request);
                        self.abandoned.insert(id);
                        self.current = Some((EventKind::Failed, request));
                        return Ok(true);
                    }
                }
            }

            match kind {
                EventKind::BodyChunkAvailable => self.chunk = self.next.take_body_chunk(),
                EventKind::Finished | EventKind::Failed => Self::settle_chain(&request),
                EventKind::GotHeaders => {}
            }
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
