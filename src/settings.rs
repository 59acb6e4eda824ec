use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};
use crate::populate::ClientConfig;

fn default_proxy_url() -> String {
    "http://localhost:8888".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    60
}

fn default_concurrency() -> usize {
    1
}

fn default_max_response_body() -> usize {
    64 * 1024
}

fn default_record_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_response_body")]
    pub max_response_body: usize,
    #[serde(default = "default_record_dir")]
    pub record_dir: PathBuf,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            concurrency: default_concurrency(),
            max_response_body: default_max_response_body(),
            record_dir: default_record_dir(),
            log: default_log_format(),
        }
    }
}

impl Settings {
    /// Layers, lowest precedence first: built-in defaults, the settings file,
    /// `CACHEFILL_*` environment variables, command-line flags.
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_with_env(cli, environment())
    }

    fn load_with_env(cli: &Cli, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = resolve_config_path(cli) {
            let required = cli.config.is_some();
            builder = builder.add_source(File::from(path.clone()).required(required));
        }
        builder = builder.add_source(env);

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.proxy_url {
            self.proxy_url = url.clone();
        }
        if let Some(log) = cli.log {
            self.log = log;
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.connect_timeout > 0,
            "connect_timeout must be greater than 0 seconds (got {})",
            self.connect_timeout
        );
        ensure!(
            self.request_timeout > 0,
            "request_timeout must be greater than 0 seconds (got {})",
            self.request_timeout
        );
        ensure!(
            self.concurrency > 0,
            "concurrency must be at least 1 (got {})",
            self.concurrency
        );
        ensure!(
            self.max_response_body > 0,
            "max_response_body must be greater than 0 (got {})",
            self.max_response_body
        );
        self.client_config()?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn client_config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig::new(&self.proxy_url)?
            .with_connect_timeout(self.connect_timeout())
            .with_request_timeout(self.request_timeout())
            .with_max_response_body(self.max_response_body))
    }
}

/// `CACHEFILL_PROXY_URL` maps to `proxy_url`. Only `__` separates nested keys,
/// so single underscores stay part of the key name.
fn environment() -> Environment {
    Environment::with_prefix("CACHEFILL")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = cli.config.as_deref() {
        return Some(path.to_path_buf());
    }
    let candidate = Path::new("cachefill.toml");
    candidate.exists().then(|| candidate.to_path_buf())
}
