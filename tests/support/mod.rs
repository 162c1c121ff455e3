#![allow(dead_code)]

mod dirs;
mod scripted;
mod upstream;

use std::sync::Arc;

use anyhow::Result;

use streamfetch::adapters::{RequestReadStream, RequestSource};
use streamfetch::client::{Client, Request, SharedClient};
use streamfetch::middleware::CacheConfig;

pub use dirs::TestDirs;
pub use scripted::{RecordedRequest, ScriptedResponse, ScriptedServer, ScriptedTransport};
pub use upstream::{TestUpstream, read_until_double_crlf};

/// Redirects on, no cache.
pub fn scripted_client(server: &ScriptedServer) -> Result<SharedClient> {
    Ok(Client::builder(server.transport()).build()?.into_shared())
}

pub fn cached_client(server: &ScriptedServer, config: CacheConfig) -> Result<SharedClient> {
    Ok(Client::builder(server.transport())
        .cache(config)
        .build()?
        .into_shared())
}

pub fn open_get(client: &SharedClient, url: &str) -> Result<(Arc<Request>, RequestReadStream)> {
    let request = Request::get(url)?;
    let stream = RequestSource::open(client, Arc::clone(&request))?;
    Ok((request, stream))
}

/// Fetches `url` through a read stream and returns status and body.
pub fn get_body(client: &SharedClient, url: &str) -> Result<(u16, Vec<u8>)> {
    let (_request, mut stream) = open_get(client, url)?;
    let response = stream.source_mut().await_response()?;
    let body = stream.read_to_end()?;
    stream.close()?;
    Ok((response.status().as_u16(), body))
}
