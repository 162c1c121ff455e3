use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, trace};

use super::codec::{BodyFraming, encode_request, read_response_head};
use super::{ClientError, Request, RequestId, Transport, TransportEvent};
use crate::stream::{ByteStream, DEFAULT_READ_SIZE, MemoryPipe, PullMode};
use crate::transform::ChunkedDecoder;
use crate::util::timeout_with_context;

const SOCKET_READ_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_header_bytes: usize,
    pub user_agent: String,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_header_bytes: 64 * 1024,
            user_agent: concat!("streamfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

type EventSender = UnboundedSender<(RequestId, TransportEvent)>;

/// Plain-text HTTP/1.1 transport. Each request runs as a task on a private
/// current-thread runtime, which only runs inside `await_next_event`.
pub struct TcpTransport {
    runtime: Runtime,
    config: Arc<TcpTransportConfig>,
    sender: EventSender,
    receiver: UnboundedReceiver<(RequestId, TransportEvent)>,
    queued: HashMap<RequestId, VecDeque<TransportEvent>>,
    live: HashSet<RequestId>,
    ready: Option<(RequestId, TransportEvent)>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build transport runtime")?;
        let (sender, receiver) = unbounded_channel();
        Ok(Self {
            runtime,
            config: Arc::new(config),
            sender,
            receiver,
            queued: HashMap::new(),
            live: HashSet::new(),
            ready: None,
        })
    }

    fn pop_queued(&mut self, ids: &[RequestId]) -> Option<(RequestId, TransportEvent)> {
        for id in ids {
            let Some(queue) = self.queued.get_mut(id) else {
                continue;
            };
            let Some(event) = queue.pop_front() else {
                continue;
            };
            if queue.is_empty() {
                self.queued.remove(id);
            }
            if matches!(
                event,
                TransportEvent::Finished | TransportEvent::Failed(_)
            ) {
                self.live.remove(id);
            }
            return Some((*id, event));
        }
        None
    }
}

impl Transport for TcpTransport {
    fn enqueue(&mut self, request: &Arc<Request>) -> Result<(), ClientError> {
        if request.url().scheme() != "http" {
            return Err(ClientError::InvalidUrl {
                url: request.url().to_string(),
                reason: "only plain http URLs are supported by the TCP transport".into(),
            });
        }
        if !self.live.insert(request.id()) {
            return Err(ClientError::AlreadyEnqueued(request.id()));
        }
        let request = Arc::clone(request);
        let config = Arc::clone(&self.config);
        let events = self.sender.clone();
        self.runtime.spawn(run_request(request, config, events));
        Ok(())
    }

    fn await_next_event(&mut self, ids: &[RequestId]) -> Result<bool, ClientError> {
        self.ready = None;
        loop {
            if let Some(event) = self.pop_queued(ids) {
                self.ready = Some(event);
                return Ok(true);
            }
            if !ids.iter().any(|id| self.live.contains(id)) {
                return Ok(false);
            }
            let received = self.runtime.block_on(self.receiver.recv());
            let Some((id, event)) = received else {
                return Err(ClientError::transport("transport event channel closed"));
            };
            self.queued.entry(id).or_default().push_back(event);
        }
    }

    fn take_event(&mut self) -> Option<(RequestId, TransportEvent)> {
        self.ready.take()
    }
}

async fn run_request(request: Arc<Request>, config: Arc<TcpTransportConfig>, events: EventSender) {
    let id = request.id();
    if let Err(err) = exchange(&request, &config, &events).await {
        debug!(request = %id, url = %request.url(), error = %err, "transfer failed");
        let _ = events.send((id, TransportEvent::Failed(format!("{err:#}"))));
    }
}

fn emit(events: &EventSender, id: RequestId, event: TransportEvent) -> Result<()> {
    events
        .send((id, event))
        .map_err(|_| anyhow!("client dropped the transport"))
}

async fn exchange(
    request: &Request,
    config: &TcpTransportConfig,
    events: &EventSender,
) -> Result<()> {
    let id = request.id();
    let url = request.url();
    let host = url.host_str().context("URL has no host")?;
    let port = url.port_or_known_default().unwrap_or(80);
    let peer = format!("{host}:{port}");

    let stream = timeout_with_context(
        config.connect_timeout,
        TcpStream::connect((host, port)),
        format!("connecting to {peer}"),
    )
    .await?;
    let (read_half, mut write_half) = stream.into_split();

    let message = encode_request(request, &config.user_agent)?;
    timeout_with_context(
        config.read_timeout,
        write_half.write_all(&message),
        format!("sending request to {peer}"),
    )
    .await?;
    trace!(request = %id, peer = %peer, "request sent");

    let mut reader = BufReader::new(read_half);
    let head = read_response_head(
        &mut reader,
        config.read_timeout,
        &peer,
        config.max_header_bytes,
    )
    .await?;
    let framing = head.body_framing(request.method());
    emit(
        events,
        id,
        TransportEvent::Headers {
            status: head.status,
            headers: head.headers,
        },
    )?;

    match framing {
        BodyFraming::Empty => {}
        BodyFraming::Fixed(length) => {
            relay_fixed(&mut reader, length, config.read_timeout, &peer, id, events).await?
        }
        BodyFraming::UntilClose => {
            relay_until_close(&mut reader, config.read_timeout, &peer, id, events).await?
        }
        BodyFraming::Chunked => {
            relay_chunked(&mut reader, config.read_timeout, &peer, id, events).await?
        }
    }
    emit(events, id, TransportEvent::Finished)
}

async fn read_some<R>(
    reader: &mut R,
    buf: &mut [u8],
    read_timeout: Duration,
    peer: &str,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    timeout_with_context(
        read_timeout,
        reader.read(buf),
        format!("reading body from {peer}"),
    )
    .await
}

async fn relay_fixed<R>(
    reader: &mut R,
    length: u64,
    read_timeout: Duration,
    peer: &str,
    id: RequestId,
    events: &EventSender,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut remaining = length;
    let mut buf = vec![0u8; SOCKET_READ_SIZE];
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        let read = read_some(reader, &mut buf[..to_read], read_timeout, peer).await?;
        if read == 0 {
            bail!("{peer} closed connection with {remaining} body bytes outstanding");
        }
        remaining -= read as u64;
        emit(
            events,
            id,
            TransportEvent::BodyChunk(Bytes::copy_from_slice(&buf[..read])),
        )?;
    }
    Ok(())
}

async fn relay_until_close<R>(
    reader: &mut R,
    read_timeout: Duration,
    peer: &str,
    id: RequestId,
    events: &EventSender,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; SOCKET_READ_SIZE];
    loop {
        let read = read_some(reader, &mut buf, read_timeout, peer).await?;
        if read == 0 {
            return Ok(());
        }
        emit(
            events,
            id,
            TransportEvent::BodyChunk(Bytes::copy_from_slice(&buf[..read])),
        )?;
    }
}

/// Socket bytes are appended to an in-memory pipe and decoded by the chunked
/// decoder as they arrive.
async fn relay_chunked<R>(
    reader: &mut R,
    read_timeout: Duration,
    peer: &str,
    id: RequestId,
    events: &EventSender,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = ByteStream::new(ChunkedDecoder::new(ByteStream::new(MemoryPipe::new())));
    let mut buf = vec![0u8; SOCKET_READ_SIZE];
    loop {
        loop {
            let pulled = decoder.pull(DEFAULT_READ_SIZE, PullMode::NoMoreThan)?;
            if pulled == 0 {
                break;
            }
            let chunk = decoder.consume(pulled)?;
            emit(events, id, TransportEvent::BodyChunk(Bytes::from(chunk)))?;
        }
        if decoder.reached_end_of_data() {
            return Ok(());
        }

        let pipe = decoder.source_mut().upstream_mut().source_mut();
        if pipe.is_writing_closed() {
            bail!("{peer} closed connection inside a chunked body");
        }
        let read = read_some(reader, &mut buf, read_timeout, peer).await?;
        if read == 0 {
            pipe.close_writing();
        } else {
            pipe.append(&buf[..read])?;
        }
    }
}
