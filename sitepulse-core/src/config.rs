//! Process configuration loading
//!
//! Loaded from `$XDG_CONFIG_HOME/sitepulse/config.toml`. This file carries
//! process-level concerns only: paths, logging, HTTP timeouts and the
//! endpoints of collaborator services. Application-level behavior (report
//! mode, cycles, thresholds) lives in the database settings store so the
//! admin surface can change it at runtime.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn xdg_dir(env_var: &str, fallback: &str) -> PathBuf {
    std::env::var(env_var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(fallback))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Override path for the SQLite database
    pub database_path: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Outbound HTTP defaults
    #[serde(default)]
    pub http: HttpConfig,

    /// Host-application collaborators (flush engine, mail service)
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Code-hosting API access
    #[serde(default)]
    pub github: GithubConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Outbound HTTP defaults
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
        }
    }
}

impl HttpConfig {
    /// Build the shared outbound HTTP client.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent("sitepulse")
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))
    }
}

fn default_http_timeout() -> u64 {
    10
}

/// Host-application collaborator endpoints.
///
/// When `base_url` is set, the flush engine lives at
/// `{base_url}/analytics/flush` and its cache ping at `{base_url}/cache/ping`;
/// `mail_endpoint` is the mail service's send URL.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct UpstreamConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub mail_endpoint: Option<String>,
}

impl UpstreamConfig {
    /// Whether the flush engine collaborator is configured
    pub fn has_flush_engine(&self) -> bool {
        self.base_url.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "upstream.base_url must be an HTTP(S) URL, got {}",
                    url
                )));
            }
        }
        if let Some(url) = &self.mail_endpoint {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "upstream.mail_endpoint must be an HTTP(S) URL, got {}",
                    url
                )));
            }
        }
        Ok(())
    }
}

/// Code-hosting API access
#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    /// Personal access token for higher rate limits (optional)
    pub token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            timeout_secs: default_github_timeout(),
        }
    }
}

fn default_github_timeout() -> u64 {
    15
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.upstream.validate()?;

        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/sitepulse/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_dir("XDG_CONFIG_HOME", ".config")
            .join("sitepulse")
            .join("config.toml")
    }

    /// `$XDG_DATA_HOME/sitepulse/` (SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_dir("XDG_DATA_HOME", ".local/share").join("sitepulse")
    }

    /// `$XDG_STATE_HOME/sitepulse/` (logs)
    pub fn state_dir() -> PathBuf {
        xdg_dir("XDG_STATE_HOME", ".local/state").join("sitepulse")
    }

    /// The database path: explicit override or the XDG data dir default
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("data.db"))
    }
}
