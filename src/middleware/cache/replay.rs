use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;

use super::CacheEntry;
use crate::client::{ClientError, EventKind, Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayPhase {
    Headers,
    Body,
    Finish,
    Done,
}

/// Serves a stored entry to a request as if it came from the network.
pub(super) struct Replay {
    request: Arc<Request>,
    entry: CacheEntry,
    body: File,
    chunk_size: usize,
    phase: ReplayPhase,
}

impl Replay {
    pub(super) fn new(
        request: Arc<Request>,
        entry: CacheEntry,
        body: File,
        chunk_size: usize,
    ) -> Self {
        Self {
            request,
            entry,
            body,
            chunk_size: chunk_size.max(1),
            phase: ReplayPhase::Headers,
        }
    }

    pub(super) fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// The next synthesized event, or `None` once the terminal event was
    /// produced.
    pub(super) fn next_event(&mut self) -> Option<(EventKind, Option<Bytes>)> {
        loop {
            match self.phase {
                ReplayPhase::Headers => {
                    self.request.mark_in_progress();
                    self.request.set_response(Response::new(
                        self.entry.status_code(),
                        self.entry.header_map(),
                        &self.request,
                    ));
                    self.phase = if self.request.method() == Method::HEAD {
                        ReplayPhase::Finish
                    } else {
                        ReplayPhase::Body
                    };
                    return Some((EventKind::GotHeaders, None));
                }
                ReplayPhase::Body => {
                    let mut buf = vec![0u8; self.chunk_size];
                    match self.body.read(&mut buf) {
                        Ok(0) => self.phase = ReplayPhase::Finish,
                        Ok(read) => {
                            buf.truncate(read);
                            return Some((EventKind::BodyChunkAvailable, Some(Bytes::from(buf))));
                        }
                        Err(err) => {
                            self.phase = ReplayPhase::Done;
                            self.request.fail_transfer(ClientError::transport(format!(
                                "failed to read cached body: {err}"
                            )));
                            return Some((EventKind::Failed, None));
                        }
                    }
                }
                ReplayPhase::Finish => {
                    self.phase = ReplayPhase::Done;
                    self.request.finish_transfer();
                    return Some((EventKind::Finished, None));
                }
                ReplayPhase::Done => return None,
            }
        }
    }
}
