use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::api::dexscreener::DEXSCREENER_BASE_URL;
use crate::tracker::{RetryPolicy, SchedulerConfig};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub static_dir: String,

    pub dexscreener_base_url: String,
    pub request_timeout_secs: u64,

    pub refresh_interval_secs: u64,
    pub refresh_jitter_ms: u64,
    pub fetch_attempts: u32,
    pub retry_base_delay_ms: u64,

    pub tokens_file: Option<String>, // Built-in universe when unset
}

/// Parse `key` if present, otherwise use `default`. A present but malformed
/// value is an error rather than a silent fallback.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Failed to parse {}={:?}", key, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 5000)?,
            static_dir: lookup("STATIC_DIR").unwrap_or_else(|| "static".to_string()),

            dexscreener_base_url: lookup("DEXSCREENER_BASE_URL")
                .unwrap_or_else(|| DEXSCREENER_BASE_URL.to_string()),
            request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 15)?,

            refresh_interval_secs: parse_or(&lookup, "REFRESH_INTERVAL_SECS", 3)?,
            refresh_jitter_ms: parse_or(&lookup, "REFRESH_JITTER_MS", 2000)?,
            fetch_attempts: parse_or(&lookup, "FETCH_ATTEMPTS", 3)?,
            retry_base_delay_ms: parse_or(&lookup, "RETRY_BASE_DELAY_MS", 2000)?,

            tokens_file: lookup("TOKENS_FILE").filter(|p| !p.trim().is_empty()),
        };

        if config.fetch_attempts == 0 {
            anyhow::bail!("FETCH_ATTEMPTS must be at least 1");
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            base_interval: Duration::from_secs(self.refresh_interval_secs),
            max_jitter: Duration::from_millis(self.refresh_jitter_ms),
            retry: RetryPolicy {
                max_attempts: self.fetch_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
        }
    }
}
