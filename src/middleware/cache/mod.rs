//! Disk-backed HTTP cache layer.
//!
//! Fresh entries are replayed without touching the network, stale entries are
//! revalidated with their validators and cacheable responses are streamed to
//! disk while they are forwarded to the caller.

mod cache_control;
mod entry;
mod key;
mod replay;
mod store;
mod writer;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, trace, warn};

pub use cache_control::{
    CacheControl, CacheSkipReason, CacheWritePlan, FreshnessRule, RequestCacheMode,
    freshness_lifetime, is_fresh, parse_cache_control, plan_cache_write, request_cache_mode,
};
pub use entry::CacheEntry;
pub use key::{cache_key, url_hash, vary_header_names, vary_key};
pub use store::CacheStore;
pub use writer::CacheWriter;

use replay::Replay;

use crate::client::{ClientError, ClientLayer, EventKind, Request, RequestFilter, RequestId};

pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 64 * 1024 * 1024;
pub const DEFAULT_REPLAY_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Overrides origin freshness when set.
    pub forced_ttl: Option<Duration>,
    pub max_entry_size: u64,
    pub replay_chunk_size: usize,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            forced_ttl: None,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            replay_chunk_size: DEFAULT_REPLAY_CHUNK_SIZE,
        }
    }
}

/// Stored entry a conditional request was sent for.
struct Revalidation {
    key: String,
    entry: CacheEntry,
}

pub struct CacheMiddleware {
    next: Box<dyn ClientLayer>,
    store: CacheStore,
    config: CacheConfig,
    replays: VecDeque<Replay>,
    revalidating: HashMap<RequestId, Revalidation>,
    writers: HashMap<RequestId, CacheWriter>,
    current: Option<(EventKind, Arc<Request>)>,
    chunk: Option<Bytes>,
}

impl CacheMiddleware {
    pub fn new(next: Box<dyn ClientLayer>, config: CacheConfig) -> Result<Self> {
        let store = CacheStore::open(&config.dir)?;
        Ok(Self {
            next,
            store,
            config,
            replays: VecDeque::new(),
            revalidating: HashMap::new(),
            writers: HashMap::new(),
            current: None,
            chunk: None,
        })
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    fn try_serve_from_cache(&mut self, request: &Arc<Request>) -> bool {
        let url = request.url().as_str();
        let headers = request.headers();
        let mode = request_cache_mode(&headers);
        if mode == RequestCacheMode::Bypass {
            return false;
        }
        let user_conditional = headers.contains_key(http::header::IF_NONE_MATCH)
            || headers.contains_key(http::header::IF_MODIFIED_SINCE);

        let (key, entry) = match self.store.lookup(url, &headers) {
            Ok(Some(found)) => found,
            Ok(None) => {
                trace!(url = %url, "cache miss");
                return false;
            }
            Err(err) => {
                warn!(url = %url, error = %err, "cache lookup failed");
                return false;
            }
        };
        request.set_cache_key(key.clone());

        if mode == RequestCacheMode::Normal && is_fresh(&entry, SystemTime::now()) {
            match self.store.open_body(&key) {
                Ok(body) => {
                    debug!(request = %request.id(), url = %url, "serving fresh cache entry");
                    self.replays.push_back(Replay::new(
                        Arc::clone(request),
                        entry,
                        body,
                        self.config.replay_chunk_size,
                    ));
                    return true;
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "cached body unavailable");
                    return false;
                }
            }
        }

        if user_conditional {
            return false;
        }
        let mut validated = false;
        if let Some(etag) = entry.etag.as_deref()
            && let Ok(value) = HeaderValue::from_str(etag)
        {
            request.insert_header(http::header::IF_NONE_MATCH, value);
            validated = true;
        }
        if let Some(last_modified) = entry.last_modified.as_deref()
            && let Ok(value) = HeaderValue::from_str(last_modified)
        {
            request.insert_header(http::header::IF_MODIFIED_SINCE, value);
            validated = true;
        }
        if validated {
            debug!(request = %request.id(), url = %url, "revalidating stale cache entry");
            self.revalidating
                .insert(request.id(), Revalidation { key, entry });
        }
        false
    }

    /// Swaps a 304 for a replay of the refreshed entry. The rest of the
    /// network exchange is drained first while the request is detached from
    /// transfer state changes. Returns false when the stored body is gone and
    /// the 304 has to be delivered as is.
    fn replay_not_modified(
        &mut self,
        request: &Arc<Request>,
        revalidation: Revalidation,
        not_modified: &HeaderMap,
    ) -> Result<bool, ClientError> {
        let Revalidation { key, entry } = revalidation;
        let body = match self.store.open_body(&key) {
            Ok(body) => body,
            Err(err) => {
                warn!(key = %key, error = %err, "cached body vanished during revalidation");
                return Ok(false);
            }
        };

        request.set_transport_detached(true);
        let drained = self.drain_exchange(request);
        request.set_transport_detached(false);
        drained?;

        let refreshed = entry.refreshed(not_modified, SystemTime::now());
        if let Err(err) = self.store.write_metadata(&key, &refreshed) {
            warn!(key = %key, error = %err, "failed to refresh cache metadata");
        }
        debug!(request = %request.id(), url = %request.url(), "cache entry revalidated");
        self.replays.push_back(Replay::new(
            Arc::clone(request),
            refreshed,
            body,
            self.config.replay_chunk_size,
        ));
        Ok(true)
    }

    fn drain_exchange(&mut self, request: &Arc<Request>) -> Result<(), ClientError> {
        let filter = RequestFilter::single(request);
        while self.next.await_next_event(&filter)? {
            if self.next.event().is_some_and(EventKind::is_terminal) {
                break;
            }
        }
        Ok(())
    }

    fn start_writer(&mut self, request: &Arc<Request>) {
        let Some(response) = request.response() else {
            return;
        };
        let now = SystemTime::now();
        let plan = plan_cache_write(
            request.method(),
            response.status(),
            response.headers(),
            self.config.forced_ttl,
            now,
        );
        if let CacheWritePlan::Skip(reason) = plan {
            trace!(request = %request.id(), reason = ?reason, "response not cached");
            return;
        }
        let Some(vary) = vary_header_names(response.headers()) else {
            return;
        };

        let url = request.url().as_str();
        let key = cache_key(url, &vary, &request.headers());
        request.set_cache_key(key.clone());
        let entry = CacheEntry::from_response(
            url,
            response.status(),
            response.headers(),
            vary,
            self.config.forced_ttl,
            now,
        );
        match CacheWriter::new(&self.store, key, entry, self.config.max_entry_size) {
            Ok(writer) => {
                self.writers.insert(request.id(), writer);
            }
            Err(err) => warn!(url = %url, error = %err, "failed to start cache write"),
        }
    }

    fn commit_writer(&mut self, request: &Arc<Request>) {
        let Some(writer) = self.writers.remove(&request.id()) else {
            return;
        };
        let key = writer.key().to_string();
        let vary = writer.entry().vary.clone();
        let url = request.url().as_str();
        match writer.commit(&self.store) {
            Ok(true) => {
                debug!(request = %request.id(), url = %url, key = %key, "response cached");
                if let Err(err) = self.store.remove_superseded(url, &key, &vary) {
                    warn!(url = %url, error = %err, "failed to prune superseded cache entries");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(url = %url, error = %err, "failed to commit cache entry"),
        }
    }

    fn next_replay_event(&mut self, filter: &RequestFilter) -> bool {
        while let Some(index) = self
            .replays
            .iter()
            .position(|replay| filter.matches(replay.request()))
        {
            let Some(replay) = self.replays.get_mut(index) else {
                return false;
            };
            match replay.next_event() {
                Some((kind, chunk)) => {
                    let request = Arc::clone(replay.request());
                    if kind.is_terminal() {
                        self.replays.remove(index);
                    }
                    self.chunk = chunk;
                    self.current = Some((kind, request));
                    return true;
                }
                None => {
                    self.replays.remove(index);
                }
            }
        }
        false
    }
}

impl ClientLayer for CacheMiddleware {
    fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError> {
        let method = request.method();
        if !method.is_safe() {
            if let Err(err) = self.store.invalidate_url(request.url().as_str()) {
                warn!(url = %request.url(), error = %err, "cache invalidation failed");
            }
            return self.next.enqueue(request);
        }
        if (method == Method::GET || method == Method::HEAD) && self.try_serve_from_cache(request) {
            return Ok(());
        }
        self.next.enqueue(request)
    }

    fn await_next_event(&mut self, filter: &RequestFilter) -> Result<bool, ClientError> {
        self.current = None;
        self.chunk = None;

        loop {
            if self.next_replay_event(filter) {
                return Ok(true);
            }
            if !self.next.await_next_event(filter)? {
                return Ok(false);
            }
            let (Some(kind), Some(request)) = (self.next.event(), self.next.request()) else {
                continue;
            };
            let id = request.id();

            match kind {
                EventKind::GotHeaders => {
                    let revalidation = self.revalidating.remove(&id);
                    let response = request.response();
                    if let (Some(revalidation), Some(response)) = (revalidation, response)
                        && response.status() == StatusCode::NOT_MODIFIED
                        && self.replay_not_modified(&request, revalidation, response.headers())?
                    {
                        continue;
                    }
                    self.start_writer(&request);
                }
                EventKind::BodyChunkAvailable => {
                    self.chunk = self.next.take_body_chunk();
                    if let Some(chunk) = self.chunk.as_ref()
                        && let Some(writer) = self.writers.get_mut(&id)
                        && let Err(err) = writer.write(chunk)
                    {
                        warn!(url = %request.url(), error = %err, "cache write failed");
                        self.writers.remove(&id);
                    }
                }
                EventKind::Finished => {
                    self.revalidating.remove(&id);
                    self.commit_writer(&request);
                }
                EventKind::Failed => {
                    self.revalidating.remove(&id);
                    self.writers.remove(&id);
                }
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
