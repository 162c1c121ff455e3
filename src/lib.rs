pub mod adapters;
pub mod cli;
pub mod client;
pub mod crawler;
pub mod logging;
pub mod middleware;
pub mod settings;
pub mod stream;
pub mod transform;
pub mod util;

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::adapters::RequestSource;
use crate::cli::{Cli, Command};
use crate::client::{Client, Request, SharedClient, TcpTransport};
use crate::crawler::{CrawlOptions, Crawler};
use crate::logging::TransferLogBuilder;
use crate::settings::Settings;

/// Composes transport, cache and redirect layers as configured.
pub fn build_client(settings: &Settings) -> Result<Client> {
    let transport = TcpTransport::new(settings.transport_config())?;
    let mut builder = Client::builder(transport)
        .follow_redirects(settings.follow_redirects)
        .max_redirects(settings.max_redirects);
    if let Some(cache) = settings.cache_config() {
        builder = builder.cache(cache);
    }
    builder.build()
}

pub fn run(cli: Cli, settings: Settings) -> Result<()> {
    let client = build_client(&settings)?.into_shared();
    match cli.command {
        Command::Fetch { url, output } => fetch(&client, &settings, &url, output.as_deref()),
        Command::Crawl { url, max_pages } => {
            let options = CrawlOptions {
                max_pages: max_pages.unwrap_or(settings.crawl_max_pages),
                same_host_only: settings.crawl_same_host_only,
            };
            let report = Crawler::new(client, options).crawl(&url)?;
            for page in &report.pages {
                let status = page
                    .status
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{status}\t{}\t{}\t{}", page.bytes, page.links, page.url);
            }
            if report.failed() > 0 {
                bail!("{} of {} pages failed", report.failed(), report.pages.len());
            }
            Ok(())
        }
    }
}

fn fetch(client: &SharedClient, settings: &Settings, url: &str, output: Option<&Path>) -> Result<()> {
    let started = Instant::now();
    let request = Request::get(url)?;
    let mut stream = RequestSource::open(client, request.clone())?
        .with_max_lookbehind(settings.stream_max_lookbehind)
        .with_max_empty_pulls(settings.stream_max_empty_pulls);

    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let copied = io::copy(&mut stream, &mut sink)
        .and_then(|bytes| sink.flush().map(|()| bytes))
        .and_then(|bytes| stream.close().map(|()| bytes).map_err(io::Error::from));

    let latest = request.latest_redirect();
    let mut log = TransferLogBuilder::new(request.method().as_str(), url)
        .final_url(latest.url().as_str())
        .redirects(latest.redirect_count())
        .elapsed(started.elapsed());
    if let Some(response) = stream.source().response() {
        log = log.status(response.status());
    }

    let bytes = match copied {
        Ok(bytes) => bytes,
        Err(err) => {
            log.error(err.to_string()).log();
            return Err(err).with_context(|| format!("failed to fetch {url}"));
        }
    };
    log.bytes(bytes).log();

    let status = stream
        .source()
        .response()
        .map(|response| response.status())
        .context("no response received")?;
    if !status.is_success() {
        bail!("{url} answered with status {status}");
    }
    info!(url = %url, bytes, "fetch complete");
    Ok(())
}
