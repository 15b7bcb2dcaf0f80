// src/config.rs

//! Configuration loading utilities.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then environment variables (a `.env` file is read first if present).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Load configuration from the environment and an optional TOML file.
pub fn load(path: Option<&Path>) -> Result<Config> {
    if let Err(e) = dotenvy::dotenv() {
        log::debug!("No .env file loaded: {}", e);
    }

    let mut config = match path {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            Config::load(path)
                .map_err(|e| AppError::config(format!("Failed to read {path:?}: {e}")))?
        }
        None => Config::default(),
    };

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Override configuration values from an environment lookup.
///
/// Empty values are treated as unset.
pub fn apply_env<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("USER_AGENT") {
        config.source.user_agent = v;
    }
    if let Some(v) = get("SEARCH_QUERY") {
        config.source.search_query = v;
    }
    if let Some(v) = get("BASE_URL") {
        config.source.base_url = v;
    }
    if let Some(v) = get("HTTP_TIMEOUT_SECS") {
        config.source.timeout_secs = parse_var("HTTP_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = get("ALERT_WEBHOOK_URL") {
        config.alert.webhook_url = v;
    }
    if let Some(v) = get("CACHE_BACKEND") {
        config.cache.backend = v.parse()?;
    }
    if let Some(v) = get("REDIS_HOST") {
        config.cache.redis_host = v;
    }
    if let Some(v) = get("REDIS_PORT") {
        config.cache.redis_port = parse_var("REDIS_PORT", &v)?;
    }
    if let Some(v) = get("CACHE_NAMESPACE_KEY") {
        config.cache.namespace = v;
    }
    if let Some(v) = get("CACHE_FILE") {
        config.cache.file_path = PathBuf::from(v);
    }
    if let Some(v) = get("DOWN_THRESHOLD") {
        config.policy.down_threshold = parse_var("DOWN_THRESHOLD", &v)?;
    }
    if let Some(v) = get("UP_THRESHOLD") {
        config.policy.up_threshold = parse_var("UP_THRESHOLD", &v)?;
    }
    if let Some(v) = get("ALERT_INTERVAL_MINUTES") {
        config.policy.alert_interval_minutes = parse_var("ALERT_INTERVAL_MINUTES", &v)?;
    }
    if let Some(v) = get("COUNT_REFRESH") {
        config.policy.count_refresh = v.parse()?;
    }
    if let Some(v) = get("SLEEP_INTERVAL_SECONDS") {
        config.scheduler.sleep_interval_secs = parse_var("SLEEP_INTERVAL_SECONDS", &v)?;
    }
    if let Some(v) = get("RETRY_MAX_ATTEMPTS") {
        config.retry.max_attempts = parse_var("RETRY_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = get("RETRY_BACKOFF_MS") {
        config.retry.backoff_ms = parse_var("RETRY_BACKOFF_MS", &v)?;
    }

    Ok(())
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::config(format!("{name} must be a non-negative integer, got '{raw}'")))
}
