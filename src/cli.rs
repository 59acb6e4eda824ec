use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "cachefill",
    about = "Inject pre-built entries into a caching proxy without an origin"
)]
pub struct Cli {
    /// Path to the settings file (defaults to ./cachefill.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Proxy base URL, e.g. http://localhost:8888.
    #[arg(long)]
    pub proxy_url: Option<String>,
    #[arg(long, value_enum)]
    pub log: Option<LogFormat>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Populate every entry listed in a TOML manifest.
    Populate {
        manifest: PathBuf,
        /// Maximum population calls in flight.
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Populate a single entry whose body is streamed from a file.
    PopulateFile {
        #[arg(long)]
        host: String,
        #[arg(long)]
        path: String,
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
        #[arg(long)]
        validator: Option<String>,
        file: PathBuf,
    },
    /// Write a standalone record file named after the entry's cache key.
    WriteRecord {
        #[command(flatten)]
        target: KeyTarget,
        #[arg(long, default_value = "text/html")]
        content_type: String,
        #[arg(long, conflicts_with = "weak_validator")]
        validator: Option<String>,
        /// Generate a `w/<timestamp>` validator.
        #[arg(long)]
        weak_validator: bool,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        body_file: PathBuf,
    },
    /// Decode a record file and log its fields.
    InspectRecord { file: PathBuf },
    /// Print the cache key for a host and path, or a URL.
    Key {
        #[command(flatten)]
        target: KeyTarget,
    },
}

#[derive(Debug, Clone, Args)]
pub struct KeyTarget {
    /// Absolute URL, e.g. http://example.com/test.
    #[arg(long, conflicts_with_all = ["host", "path"])]
    pub url: Option<String>,
    #[arg(long, requires = "path")]
    pub host: Option<String>,
    #[arg(long, requires = "host")]
    pub path: Option<String>,
}

impl KeyTarget {
    pub fn key(&self) -> Result<CacheKey> {
        match (&self.url, &self.host, &self.path) {
            (Some(url), _, _) => Ok(CacheKey::from_url(url)?),
            (None, Some(host), Some(path)) => Ok(CacheKey::derive(host, path)?),
            _ => bail!("either --url or both --host and --path are required"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
