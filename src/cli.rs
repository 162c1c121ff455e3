use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "streamfetch",
    version,
    about = "Streaming HTTP fetcher with an on-disk cache"
)]
pub struct Cli {
    /// Path to the configuration file (defaults to ./streamfetch.toml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides the log format from the configuration.
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Download one URL, following redirects.
    Fetch {
        url: String,
        /// Write the body here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Breadth-first crawl starting at URL.
    Crawl {
        url: String,
        #[arg(long)]
        max_pages: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fetch_with_global_flags() {
        let cli = Cli::try_parse_from([
            "streamfetch",
            "fetch",
            "http://example.test/",
            "-o",
            "out.bin",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        match cli.command {
            Command::Fetch { url, output } => {
                assert_eq!(url, "http://example.test/");
                assert_eq!(output, Some(PathBuf::from("out.bin")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_crawl() {
        let cli = Cli::try_parse_from([
            "streamfetch",
            "--config",
            "sf.toml",
            "crawl",
            "http://example.test/",
            "--max-pages",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("sf.toml")));
        assert!(matches!(
            cli.command,
            Command::Crawl {
                max_pages: Some(3),
                ..
            }
        ));
    }
}
