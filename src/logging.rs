use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// Summary of one completed (or failed) logical request, redirects included.
#[derive(Debug, Clone)]
pub struct TransferLogEvent {
    pub method: String,
    pub url: String,
    pub final_url: Option<String>,
    pub status: u16,
    pub redirects: usize,
    pub bytes: u64,
    pub elapsed_ms: u128,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct TransferLogBuilder {
    event: TransferLogEvent,
}

impl TransferLogBuilder {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            event: TransferLogEvent {
                method: method.into(),
                url: url.into(),
                final_url: None,
                status: 0,
                redirects: 0,
                bytes: 0,
                elapsed_ms: 0,
                error: None,
            },
        }
    }

    pub fn final_url(mut self, url: impl Into<String>) -> Self {
        self.event.final_url = Some(url.into());
        self
    }

    pub fn status(mut self, status: http::StatusCode) -> Self {
        self.event.status = status.as_u16();
        self
    }

    pub fn redirects(mut self, redirects: usize) -> Self {
        self.event.redirects = redirects;
        self
    }

    pub fn bytes(mut self, bytes: u64) -> Self {
        self.event.bytes = bytes;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed_ms = elapsed.as_millis();
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.event.error = Some(error.into());
        self
    }

    pub fn build(self) -> TransferLogEvent {
        self.event
    }

    pub fn log(self) {
        log_transfer(self.build());
    }
}

pub fn log_transfer(event: TransferLogEvent) {
    let TransferLogEvent {
        method,
        url,
        final_url,
        status,
        redirects,
        bytes,
        elapsed_ms,
        error,
    } = event;

    let final_url_field = final_url.as_deref();
    let error_field = error.as_deref();

    if error.is_some() {
        tracing::warn!(
            target = "transfer_log",
            method,
            url,
            final_url = final_url_field,
            status,
            redirects,
            bytes,
            elapsed_ms,
            error = error_field
        );
    } else {
        tracing::info!(
            target = "transfer_log",
            method,
            url,
            final_url = final_url_field,
            status,
            redirects,
            bytes,
            elapsed_ms
        );
    }
}
