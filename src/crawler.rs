//! Breadth-first crawler built on request read streams.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, ensure};
use http::{Method, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};
use url::Url;

use crate::adapters::RequestSource;
use crate::client::{Request, SharedClient};
use crate::logging::TransferLogBuilder;
use crate::stream::StreamResult;
use crate::util::resolve_url;

static LINK_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|\s)(?:href|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'<>`=]+))"#)
        .expect("compile link regex")
});

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_pages: usize,
    /// Only follow links to the seed's host.
    pub same_host_only: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_pages: 50,
            same_host_only: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageReport {
    pub url: Url,
    /// Where the redirect chain ended.
    pub final_url: Url,
    pub status: Option<StatusCode>,
    pub bytes: u64,
    pub links: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub pages: Vec<PageReport>,
}

impl CrawlReport {
    pub fn succeeded(&self) -> usize {
        self.pages.iter().filter(|page| page.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.pages.len() - self.succeeded()
    }

    pub fn page(&self, url: &str) -> Option<&PageReport> {
        self.pages.iter().find(|page| page.url.as_str() == url)
    }
}

pub struct Crawler {
    client: SharedClient,
    options: CrawlOptions,
}

impl Crawler {
    pub fn new(client: SharedClient, options: CrawlOptions) -> Self {
        Self { client, options }
    }

    pub fn crawl(&self, seed: &str) -> Result<CrawlReport> {
        let seed = Url::parse(seed).with_context(|| format!("invalid seed URL '{seed}'"))?;
        ensure!(
            matches!(seed.scheme(), "http" | "https"),
            "seed URL must be http(s), got '{seed}'"
        );

        let mut report = CrawlReport::default();
        let mut seen = HashSet::from([seed.to_string()]);
        let mut queue = VecDeque::from([seed.clone()]);

        while let Some(url) = queue.pop_front() {
            if report.pages.len() >= self.options.max_pages {
                break;
            }
            let (page, links) = self.visit(&url);
            for link in links {
                if self.options.same_host_only && link.host_str() != seed.host_str() {
                    continue;
                }
                if seen.insert(link.to_string()) {
                    queue.push_back(link);
                }
            }
            report.pages.push(page);
        }

        info!(
            seed = %seed,
            pages = report.pages.len(),
            failed = report.failed(),
            "crawl finished"
        );
        Ok(report)
    }

    fn visit(&self, url: &Url) -> (PageReport, Vec<Url>) {
        let started = Instant::now();
        let request = Request::builder(Method::GET, url.clone()).build();
        let outcome = self.download(&request);

        let final_url = request.latest_redirect().url().clone();
        let mut log = TransferLogBuilder::new("GET", url.as_str())
            .final_url(final_url.as_str())
            .redirects(request.latest_redirect().redirect_count())
            .elapsed(started.elapsed());

        let mut page = PageReport {
            url: url.clone(),
            final_url: final_url.clone(),
            status: None,
            bytes: 0,
            links: 0,
            error: None,
        };

        let links = match outcome {
            Ok((status, is_html, body)) => {
                page.status = Some(status);
                page.bytes = body.len() as u64;
                log = log.status(status).bytes(page.bytes);
                let links = if is_html && status.is_success() {
                    extract_links(&String::from_utf8_lossy(&body), &final_url)
                } else {
                    Vec::new()
                };
                page.links = links.len();
                debug!(url = %url, links = links.len(), "page crawled");
                links
            }
            Err(err) => {
                let message = err.to_string();
                log = log.error(message.clone());
                page.error = Some(message);
                Vec::new()
            }
        };
        log.log();
        (page, links)
    }

    /// Reads the whole body; unfinished request streams cannot be cancelled.
    fn download(&self, request: &Arc<Request>) -> StreamResult<(StatusCode, bool, Vec<u8>)> {
        let mut stream = RequestSource::open(&self.client, Arc::clone(request))?;
        let response = stream.source_mut().await_response()?;
        let body = stream.read_to_end()?;
        stream.close()?;

        let is_html = response
            .header_str(http::header::CONTENT_TYPE)
            .is_none_or(|value| value.to_ascii_lowercase().contains("html"));
        Ok((response.status(), is_html, body))
    }
}

/// Absolute http(s) targets of `href`/`src` attributes, deduplicated in
/// document order.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for captures in LINK_ATTRIBUTE.captures_iter(html) {
        let Some(raw) = captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))
        else {
            continue;
        };
        let decoded = raw.as_str().replace("&amp;", "&");
        let Ok(link) = resolve_url(&decoded, base) else {
            continue;
        };
        if seen.insert(link.to_string()) {
            links.push(link);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_and_bare_attributes() {
        let base = Url::parse("http://example.test/dir/index.html").unwrap();
        let html = r#"
            <a href="page.html#frag">one</a>
            <img SRC='/img/logo.png'>
            <a href=other.html>bare</a>
            <a href="page.html">duplicate</a>
            <a href="mailto:me@example.test">mail</a>
            <a href="https://cdn.test/x?a=1&amp;b=2">cdn</a>
            <div data-href="ignored.html"></div>
        "#;
        let links: Vec<String> = extract_links(html, &base)
            .into_iter()
            .map(|url| url.to_string())
            .collect();
        assert_eq!(
            links,
            vec![
                "http://example.test/dir/page.html",
                "http://example.test/img/logo.png",
                "http://example.test/dir/other.html",
                "https://cdn.test/x?a=1&b=2",
            ]
        );
    }

    #[test]
    fn report_counts_failures() {
        let url = Url::parse("http://example.test/").unwrap();
        let page = |error: Option<&str>| PageReport {
            url: url.clone(),
            final_url: url.clone(),
            status: None,
            bytes: 0,
            links: 0,
            error: error.map(str::to_string),
        };
        let report = CrawlReport {
            pages: vec![page(None), page(Some("boom")), page(None)],
        };
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
    }
}
