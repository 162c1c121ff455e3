use std::{future::Future, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use sha1::{Digest, Sha1};
use tokio::time::timeout;
use url::Url;

/// Resolves `reference` (absolute or relative) against `base` and normalizes
/// the result. Only http(s) targets are accepted; fragments are dropped since
/// they never reach the server.
pub fn resolve_url(reference: &str, base: &Url) -> Result<Url> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        bail!("empty URL reference");
    }
    let mut resolved = base
        .join(trimmed)
        .with_context(|| format!("cannot resolve '{trimmed}' against {base}"))?;
    match resolved.scheme() {
        "http" | "https" => {}
        other => bail!("unsupported URL scheme '{other}' in '{trimmed}'"),
    }
    if resolved.host_str().is_none() {
        bail!("URL '{resolved}' has no host");
    }
    resolved.set_fragment(None);
    Ok(resolved)
}

pub fn sha1_hex(data: impl AsRef<[u8]>) -> String {
    let digest = Sha1::digest(data.as_ref());
    hex::encode(digest)
}

/// Wraps `tokio::time::timeout`, converting elapsed deadlines and inner errors into contextual
/// `anyhow::Error` values for consistent diagnostics.
pub async fn timeout_with_context<F, T, E>(
    duration: Duration,
    future: F,
    context: impl Into<String>,
) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let context = context.into();
    timeout(duration, future)
        .await
        .map_err(|_| anyhow!("timed out {context}"))?
        .with_context(|| format!("failed while {context}"))
}
