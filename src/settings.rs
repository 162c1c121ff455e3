use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};
use crate::client::TcpTransportConfig;
use crate::middleware::CacheConfig;

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_user_agent() -> String {
    concat!("streamfetch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn default_max_header_bytes() -> usize {
    64 * 1024
}

fn default_follow_redirects() -> bool {
    true
}

fn default_max_redirects() -> usize {
    crate::client::DEFAULT_MAX_REDIRECTS
}

fn default_cache_max_entry_size() -> u64 {
    crate::middleware::cache::DEFAULT_MAX_ENTRY_SIZE
}

fn default_cache_replay_chunk_size() -> usize {
    crate::middleware::cache::DEFAULT_REPLAY_CHUNK_SIZE
}

fn default_stream_max_lookbehind() -> usize {
    crate::stream::DEFAULT_MAX_LOOKBEHIND_BYTES
}

fn default_stream_max_empty_pulls() -> usize {
    crate::stream::DEFAULT_MAX_EMPTY_PULLS
}

fn default_crawl_max_pages() -> usize {
    50
}

fn default_crawl_same_host_only() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    #[serde(default = "default_follow_redirects")]
    pub follow_redirects: bool,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Forced freshness lifetime in seconds, overriding origin headers.
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    #[serde(default = "default_cache_max_entry_size")]
    pub cache_max_entry_size: u64,
    #[serde(default = "default_cache_replay_chunk_size")]
    pub cache_replay_chunk_size: usize,
    #[serde(default = "default_stream_max_lookbehind")]
    pub stream_max_lookbehind: usize,
    #[serde(default = "default_stream_max_empty_pulls")]
    pub stream_max_empty_pulls: usize,
    #[serde(default = "default_crawl_max_pages")]
    pub crawl_max_pages: usize,
    #[serde(default = "default_crawl_same_host_only")]
    pub crawl_same_host_only: bool,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut settings = Self::load_from(cli.config.as_deref())?;
        if let Some(format) = cli.log_format {
            settings.log = format;
        }
        Ok(settings)
    }

    /// Layers an optional TOML file under `STREAMFETCH__*` environment
    /// overrides. An explicitly named file must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_candidates()
                .into_iter()
                .find(|candidate| candidate.exists()),
        };
        if let Some(config_path) = &config_path {
            builder = builder.add_source(File::from(config_path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("STREAMFETCH")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(config_path) = &config_path {
            settings.apply_base_dir(config_path);
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn transport_config(&self) -> TcpTransportConfig {
        TcpTransportConfig {
            connect_timeout: self.connect_timeout(),
            read_timeout: self.read_timeout(),
            max_header_bytes: self.max_header_bytes,
            user_agent: self.user_agent.clone(),
        }
    }

    /// `None` when caching is disabled.
    pub fn cache_config(&self) -> Option<CacheConfig> {
        let dir = self.cache_dir.clone()?;
        Some(CacheConfig {
            dir,
            forced_ttl: self.cache_ttl.map(Duration::from_secs),
            max_entry_size: self.cache_max_entry_size,
            replay_chunk_size: self.cache_replay_chunk_size,
        })
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        if let Some(cache_dir) = self.cache_dir.clone() {
            self.cache_dir = Some(absolutize(&cache_dir, base_dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.connect_timeout > 0,
            "connect_timeout must be greater than 0 seconds (got {})",
            self.connect_timeout
        );
        ensure!(
            self.read_timeout > 0,
            "read_timeout must be greater than 0 seconds (got {})",
            self.read_timeout
        );
        ensure!(
            self.max_header_bytes > 0,
            "max_header_bytes must be greater than 0 (got {})",
            self.max_header_bytes
        );
        ensure!(
            !self.user_agent.trim().is_empty(),
            "user_agent must not be empty"
        );
        ensure!(
            self.stream_max_lookbehind > 0,
            "stream_max_lookbehind must be greater than 0 (got {})",
            self.stream_max_lookbehind
        );
        ensure!(
            self.crawl_max_pages > 0,
            "crawl_max_pages must be greater than 0 (got {})",
            self.crawl_max_pages
        );
        if self.cache_dir.is_some() {
            ensure!(
                self.cache_max_entry_size > 0,
                "cache_max_entry_size must be greater than 0 (got {})",
                self.cache_max_entry_size
            );
            ensure!(
                self.cache_replay_chunk_size > 0,
                "cache_replay_chunk_size must be greater than 0 (got {})",
                self.cache_replay_chunk_size
            );
        }
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn default_config_candidates() -> [PathBuf; 1] {
    [PathBuf::from("streamfetch.toml")]
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
