use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};

/// Raw HTTP/1.1 origin on its own runtime, so synchronous client code can
/// block on it from the test thread.
pub struct TestUpstream {
    addr: SocketAddr,
    heads: Arc<Mutex<Vec<String>>>,
    _runtime: Runtime,
}

impl TestUpstream {
    /// Answers every connection with `response` and closes it.
    pub fn http_response(response: impl Into<Vec<u8>>) -> Result<Self> {
        Self::http_responses(vec![response.into()])
    }

    /// Answers connections in order, repeating the last response.
    pub fn http_responses(responses: Vec<Vec<u8>>) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .context("failed to build upstream runtime")?;
        let listener = runtime.block_on(TcpListener::bind((Ipv4Addr::LOCALHOST, 0)))?;
        let addr = listener.local_addr()?;
        let heads = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&heads);
        runtime.spawn(async move {
            let mut served = 0usize;
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let response = responses
                    .get(served)
                    .or_else(|| responses.last())
                    .cloned()
                    .unwrap_or_default();
                served += 1;
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    if let Ok(head) = read_until_double_crlf(&mut stream).await {
                        recorded.lock().push(head);
                    }
                    let _ = stream.write_all(&response).await;
                    stream.shutdown().await.ok();
                });
            }
        });

        Ok(Self {
            addr,
            heads,
            _runtime: runtime,
        })
    }

    pub fn http_ok(body: &str) -> Result<Self> {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        Self::http_response(response.into_bytes())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Request heads received so far, in arrival order.
    pub fn request_heads(&self) -> Vec<String> {
        self.heads.lock().clone()
    }
}

pub async fn read_until_double_crlf(stream: &mut TcpStream) -> Result<String> {
    let mut buffer = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let bytes = stream.read(&mut byte).await?;
        if bytes == 0 {
            break;
        }
        buffer.extend_from_slice(&byte);
        if buffer.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8(buffer).context("invalid UTF-8 request head")
}
