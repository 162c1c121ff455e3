//! HTTP/1.1 wire codec used by [`TcpTransport`](super::TcpTransport).

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::warn;

use super::Request;
use crate::util::timeout_with_context;

#[derive(Debug)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub chunked: bool,
}

/// How the body following a response head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Fixed(u64),
    Chunked,
    UntilClose,
}

impl ResponseHead {
    pub fn body_framing(&self, method: &Method) -> BodyFraming {
        if method == Method::HEAD
            || self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
        {
            return BodyFraming::Empty;
        }
        if self.chunked {
            return BodyFraming::Chunked;
        }
        match self.content_length {
            Some(0) => BodyFraming::Empty,
            Some(length) => BodyFraming::Fixed(length),
            None => BodyFraming::UntilClose,
        }
    }
}

struct HeaderBudget {
    limit: usize,
    used: usize,
}

impl HeaderBudget {
    fn new(limit: usize) -> Result<Self> {
        ensure!(limit > 0, "header limit must be greater than zero");
        Ok(Self { limit, used: 0 })
    }

    fn record(&mut self, bytes: usize) -> Result<()> {
        self.used = self
            .used
            .checked_add(bytes)
            .ok_or_else(|| anyhow!("header size overflow"))?;
        ensure!(
            self.used <= self.limit,
            "response headers exceed configured limit of {} bytes",
            self.limit
        );
        Ok(())
    }
}

pub(crate) async fn read_line_with_timeout<S>(
    reader: &mut BufReader<S>,
    buf: &mut String,
    timeout_dur: Duration,
    peer: &str,
    max_len: usize,
) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    ensure!(max_len > 0, "line length limit must be greater than zero");
    buf.clear();
    let mut collected = Vec::new();

    loop {
        let available = timeout_with_context(
            timeout_dur,
            reader.fill_buf(),
            format!("reading line from {peer}"),
        )
        .await?;

        if available.is_empty() {
            if collected.is_empty() {
                return Ok(0);
            }
            bail!("connection closed while reading line from {peer}");
        }

        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());

        if collected
            .len()
            .checked_add(consume)
            .ok_or_else(|| anyhow!("line length overflow for {peer}"))?
            > max_len
        {
            bail!("line from {peer} exceeds configured limit of {max_len} bytes");
        }

        collected.extend_from_slice(&available[..consume]);
        reader.consume(consume);

        if newline_pos.is_some() {
            break;
        }
    }

    let string = String::from_utf8(collected)
        .map_err(|_| anyhow!("line from {peer} contained invalid bytes"))?;
    let len = string.len();
    *buf = string;
    Ok(len)
}

/// Reads the next final (non-1xx) response head.
pub async fn read_response_head<S>(
    reader: &mut BufReader<S>,
    timeout_dur: Duration,
    peer: &str,
    max_header_bytes: usize,
) -> Result<ResponseHead>
where
    S: AsyncRead + Unpin,
{
    loop {
        let head = read_single_head(reader, timeout_dur, peer, max_header_bytes).await?;
        if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
            continue;
        }
        return Ok(head);
    }
}

async fn read_single_head<S>(
    reader: &mut BufReader<S>,
    timeout_dur: Duration,
    peer: &str,
    max_header_bytes: usize,
) -> Result<ResponseHead>
where
    S: AsyncRead + Unpin,
{
    let mut budget = HeaderBudget::new(max_header_bytes)?;
    let mut status_line = String::new();
    let bytes =
        read_line_with_timeout(reader, &mut status_line, timeout_dur, peer, max_header_bytes)
            .await?;
    if bytes == 0 {
        bail!("{peer} closed connection before sending status line");
    }
    budget.record(bytes)?;
    let (version, status) = parse_status_line(status_line.trim_end_matches(['\r', '\n']))?;

    let mut headers = HeaderMap::new();
    let mut content_length = None;
    let mut chunked = false;
    let mut transfer_encoding_present = false;

    let mut header_line = String::new();
    loop {
        let read = read_line_with_timeout(
            reader,
            &mut header_line,
            timeout_dur,
            peer,
            max_header_bytes,
        )
        .await?;
        if read == 0 {
            bail!("{peer} closed connection during headers");
        }
        budget.record(read)?;
        let trimmed = header_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("header missing ':' separator from {peer}"))?;
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if content_length.is_some() {
                bail!("multiple Content-Length headers from {peer} are not supported");
            }
            let parsed: u64 = value
                .parse()
                .with_context(|| format!("invalid Content-Length value '{value}'"))?;
            content_length = Some(parsed);
        }
        if name.eq_ignore_ascii_case("transfer-encoding") {
            transfer_encoding_present = true;
            if value.to_ascii_lowercase().contains("chunked") {
                chunked = true;
            }
        }
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name '{name}' from {peer}"))?;
        let header_value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header '{name}' from {peer}"))?;
        headers.append(header_name, header_value);
    }

    if transfer_encoding_present && content_length.is_some() {
        warn!(
            peer = %peer,
            "response contained both Transfer-Encoding and Content-Length; rejecting"
        );
        bail!("response must not include both Transfer-Encoding and Content-Length");
    }

    Ok(ResponseHead {
        version,
        status,
        headers,
        content_length,
        chunked,
    })
}

pub fn parse_status_line(value: &str) -> Result<(Version, StatusCode)> {
    let mut parts = value.split_whitespace();
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("status line missing HTTP version"))?;
    let status = parts
        .next()
        .ok_or_else(|| anyhow!("status line missing status code"))?;

    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => bail!("unsupported HTTP version '{other}'"),
    };

    let status_code: u16 = status
        .parse()
        .with_context(|| format!("invalid status code '{status}'"))?;
    let status = StatusCode::from_u16(status_code)
        .map_err(|_| anyhow!("unsupported status code '{status_code}'"))?;

    Ok((version, status))
}

/// Serializes `request` as an HTTP/1.1 message on a connection that closes
/// after the response.
pub fn encode_request(request: &Request, user_agent: &str) -> Result<Vec<u8>> {
    let url = request.url();
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("URL '{url}' has no host"))?;

    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut buffer = Vec::with_capacity(256);
    buffer.extend_from_slice(request.method().as_str().as_bytes());
    buffer.push(b' ');
    buffer.extend_from_slice(target.as_bytes());
    buffer.extend_from_slice(b" HTTP/1.1\r\nHost: ");
    buffer.extend_from_slice(host.as_bytes());
    if let Some(port) = url.port() {
        buffer.extend_from_slice(format!(":{port}").as_bytes());
    }
    buffer.extend_from_slice(b"\r\n");

    let headers = request.headers();
    for (name, value) in headers.iter() {
        if name == http::header::HOST
            || name == http::header::CONNECTION
            || name == http::header::CONTENT_LENGTH
            || name == http::header::TRANSFER_ENCODING
        {
            continue;
        }
        buffer.extend_from_slice(name.as_str().as_bytes());
        buffer.extend_from_slice(b": ");
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
    if !headers.contains_key(http::header::USER_AGENT) {
        buffer.extend_from_slice(b"user-agent: ");
        buffer.extend_from_slice(user_agent.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
    if let Some(body) = request.body() {
        buffer.extend_from_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
    }
    buffer.extend_from_slice(b"connection: close\r\n\r\n");
    if let Some(body) = request.body() {
        buffer.extend_from_slice(body);
    }
    Ok(buffer)
}
