mod support;

use anyhow::Result;

use streamfetch::crawler::{CrawlOptions, Crawler};

use support::*;

fn html(body: &str) -> ScriptedResponse {
    ScriptedResponse::ok(body).header("content-type", "text/html; charset=utf-8")
}

fn site() -> ScriptedServer {
    let server = ScriptedServer::new();
    server
        .route(
            "http://site.test/",
            html(r#"<a href="/a">a</a> <a href="/b">b</a> <a href="http://elsewhere.test/">x</a>"#),
        )
        .route(
            "http://site.test/a",
            html(r#"<a href="/">home</a> <img src="/logo.png">"#),
        )
        .route("http://site.test/b", ScriptedResponse::redirect(301, "/c"))
        .route("http://site.test/c", html(r#"<a href="a">again</a>"#))
        .route(
            "http://site.test/logo.png",
            ScriptedResponse::ok("PNG").header("content-type", "image/png"),
        )
        .route("http://elsewhere.test/", html("offsite"));
    server
}

#[test]
fn crawls_same_host_pages_breadth_first() -> Result<()> {
    let server = site();
    let client = scripted_client(&server)?;
    let report = Crawler::new(client, CrawlOptions::default()).crawl("http://site.test/")?;

    let visited: Vec<&str> = report.pages.iter().map(|page| page.url.as_str()).collect();
    assert_eq!(
        visited,
        vec![
            "http://site.test/",
            "http://site.test/a",
            "http://site.test/b",
            "http://site.test/logo.png",
        ]
    );
    assert_eq!(report.failed(), 0);
    assert!(server.requests_to("http://elsewhere.test/").is_empty());

    let home = report.page("http://site.test/").expect("home page");
    assert_eq!(home.links, 3);

    let moved = report.page("http://site.test/b").expect("redirected page");
    assert_eq!(moved.final_url.as_str(), "http://site.test/c");
    assert_eq!(moved.links, 1);

    let logo = report.page("http://site.test/logo.png").expect("image");
    assert_eq!(logo.links, 0);
    assert_eq!(logo.bytes, 3);
    Ok(())
}

#[test]
fn page_limit_stops_the_crawl() -> Result<()> {
    let server = site();
    let client = scripted_client(&server)?;
    let options = CrawlOptions {
        max_pages: 2,
        ..CrawlOptions::default()
    };
    let report = Crawler::new(client, options).crawl("http://site.test/")?;
    assert_eq!(report.pages.len(), 2);
    assert_eq!(server.request_count(), 2);
    Ok(())
}

#[test]
fn failed_pages_are_reported_not_fatal() -> Result<()> {
    let server = ScriptedServer::new();
    server
        .route(
            "http://site.test/",
            html(r#"<a href="/down">down</a> <a href="/up">up</a>"#),
        )
        .route(
            "http://site.test/down",
            ScriptedResponse::unreachable("connection refused"),
        )
        .route("http://site.test/up", html("fine"));
    let client = scripted_client(&server)?;

    let report = Crawler::new(client, CrawlOptions::default()).crawl("http://site.test/")?;
    assert_eq!(report.pages.len(), 3);
    assert_eq!(report.failed(), 1);
    let down = report.page("http://site.test/down").expect("failed page");
    assert!(down.status.is_none());
    assert!(
        down.error
            .as_deref()
            .is_some_and(|error| error.contains("connection refused"))
    );
    Ok(())
}

#[test]
fn rejects_non_http_seeds() -> Result<()> {
    let server = ScriptedServer::new();
    let client = scripted_client(&server)?;
    assert!(
        Crawler::new(client, CrawlOptions::default())
            .crawl("ftp://site.test/")
            .is_err()
    );
    Ok(())
}
