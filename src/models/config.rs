//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Search page location and HTTP behavior
    #[serde(default)]
    pub source: SourceConfig,

    /// Alert sink settings
    #[serde(default)]
    pub alert: AlertConfig,

    /// Persistent cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Threshold and cooldown policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Polling loop settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Retry policy shared by the fetcher and the dispatcher
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    ///
    /// `require_webhook` is false in dry-run mode, where alerts are only logged.
    pub fn validate(&self, require_webhook: bool) -> Result<()> {
        let mut issues: Vec<String> = Vec::new();

        if self.source.base_url.trim().is_empty() {
            issues.push("BASE_URL is empty".into());
        } else if let Err(e) = url::Url::parse(&self.source.search_url()) {
            issues.push(format!("search URL is invalid: {e}"));
        }
        if self.source.user_agent.trim().is_empty() {
            issues.push("USER_AGENT is empty".into());
        }
        if self.source.timeout_secs == 0 {
            issues.push("HTTP_TIMEOUT_SECS must be > 0".into());
        }
        if require_webhook && self.alert.webhook_url.trim().is_empty() {
            issues.push("ALERT_WEBHOOK_URL is empty".into());
        }
        if self.cache.namespace.trim().is_empty() {
            issues.push("CACHE_NAMESPACE_KEY is empty".into());
        }
        if self.policy.up_threshold <= self.policy.down_threshold {
            issues.push("UP_THRESHOLD must be greater than DOWN_THRESHOLD".into());
        }
        if self.policy.alert_interval_minutes == 0 {
            issues.push("ALERT_INTERVAL_MINUTES must be > 0".into());
        } else if self.policy.alert_interval_minutes > MAX_ALERT_INTERVAL_MINUTES {
            issues.push(format!(
                "ALERT_INTERVAL_MINUTES must be <= {MAX_ALERT_INTERVAL_MINUTES}"
            ));
        }
        if self.scheduler.sleep_interval_secs == 0 {
            issues.push("SLEEP_INTERVAL_SECONDS must be > 0".into());
        }
        if self.retry.max_attempts == 0 {
            issues.push("RETRY_MAX_ATTEMPTS must be > 0".into());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation(format!(
                "Invalid config:\n - {}",
                issues.join("\n - ")
            )))
        }
    }
}

/// Search page location and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Site root; also the base for relative clinic links
    #[serde(default)]
    pub base_url: String,

    /// Path and query appended to `base_url` to form the search URL
    #[serde(default)]
    pub search_query: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl SourceConfig {
    /// Full URL of the search results page.
    pub fn search_url(&self) -> String {
        format!("{}{}", self.base_url, self.search_query)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            search_query: String::new(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Alert sink settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Webhook receiving `content=<message>` form posts
    #[serde(default)]
    pub webhook_url: String,
}

/// Which persistence layer backs the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Redis,
    File,
}

impl FromStr for CacheBackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "file" => Ok(Self::File),
            other => Err(AppError::config(format!(
                "CACHE_BACKEND must be 'redis' or 'file', got '{other}'"
            ))),
        }
    }
}

/// Persistent cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    #[serde(default = "defaults::redis_host")]
    pub redis_host: String,

    #[serde(default = "defaults::redis_port")]
    pub redis_port: u16,

    /// Name of the hash (or file map) holding all entries
    #[serde(default = "defaults::namespace")]
    pub namespace: String,

    /// JSON file used by the file backend
    #[serde(default = "defaults::cache_file")]
    pub file_path: PathBuf,
}

impl CacheConfig {
    /// Connection URL for the Redis backend.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            redis_host: defaults::redis_host(),
            redis_port: defaults::redis_port(),
            namespace: defaults::namespace(),
            file_path: defaults::cache_file(),
        }
    }
}

/// When the cached count is refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountRefresh {
    /// Only when an up or down alert was sent
    #[default]
    OnAlert,
    /// On every poll the entity is seen
    Always,
}

impl FromStr for CountRefresh {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "on-alert" | "on_alert" => Ok(Self::OnAlert),
            "always" => Ok(Self::Always),
            other => Err(AppError::config(format!(
                "COUNT_REFRESH must be 'on-alert' or 'always', got '{other}'"
            ))),
        }
    }
}

/// Longest accepted alert cooldown: 100 years.
pub const MAX_ALERT_INTERVAL_MINUTES: u64 = 100 * 365 * 24 * 60;

/// Threshold and cooldown policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Counts at or above this trigger an up-alert
    #[serde(default = "defaults::up_threshold")]
    pub up_threshold: u32,

    /// Counts at or below this (coming from above) trigger a down-alert
    #[serde(default = "defaults::down_threshold")]
    pub down_threshold: u32,

    /// Cooldown between two alerts of the same kind for one clinic
    #[serde(default = "defaults::alert_interval")]
    pub alert_interval_minutes: u64,

    #[serde(default)]
    pub count_refresh: CountRefresh,
}

impl PolicyConfig {
    /// Cooldown window as a chrono duration.
    ///
    /// Clamped to [`MAX_ALERT_INTERVAL_MINUTES`].
    pub fn alert_interval(&self) -> chrono::Duration {
        let minutes = self.alert_interval_minutes.min(MAX_ALERT_INTERVAL_MINUTES);
        chrono::Duration::minutes(minutes as i64)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            up_threshold: defaults::up_threshold(),
            down_threshold: defaults::down_threshold(),
            alert_interval_minutes: defaults::alert_interval(),
            count_refresh: CountRefresh::default(),
        }
    }
}

/// Polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "defaults::sleep_interval")]
    pub sleep_interval_secs: u64,
}

impl SchedulerConfig {
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sleep_interval_secs: defaults::sleep_interval(),
        }
    }
}

/// Bounded exponential backoff for HTTP calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first request
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled on each further retry
    #[serde(default = "defaults::backoff")]
    pub backoff_ms: u64,

    #[serde(default = "defaults::max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            backoff_ms: defaults::backoff(),
            max_backoff_ms: defaults::max_backoff(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Source defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; clinic-tracker/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Cache defaults
    pub fn redis_host() -> String {
        "localhost".into()
    }
    pub fn redis_port() -> u16 {
        6379
    }
    pub fn namespace() -> String {
        "CCVW-clinic-tracker".into()
    }
    pub fn cache_file() -> PathBuf {
        PathBuf::from("cache.json")
    }

    // Policy defaults
    pub fn up_threshold() -> u32 {
        25
    }
    pub fn down_threshold() -> u32 {
        5
    }
    pub fn alert_interval() -> u64 {
        60
    }

    // Scheduler defaults
    pub fn sleep_interval() -> u64 {
        120
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        4
    }
    pub fn backoff() -> u64 {
        500
    }
    pub fn max_backoff() -> u64 {
        30_000
    }
}
