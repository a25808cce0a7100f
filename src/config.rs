//! Harvester configuration.
//!
//! Defaults match the baseline behaviour (3 concurrent fetches, 2 attempts,
//! 2 s between attempts). [`HarvesterConfig::from_env`] layers `HARVESTER_*`
//! environment variables (and a `.env` file, if present) on top.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::harvest::retry::{Backoff, RetryPolicy};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    /// Maximum fetches in flight at once
    pub concurrency: usize,

    /// Attempt budget per file, first attempt included
    pub max_attempts: u32,

    /// Delay after a failed attempt (initial delay when exponential)
    pub retry_delay: Duration,

    /// Double the delay after each failure instead of keeping it fixed
    pub exponential_backoff: bool,

    /// Upper bound for exponential delays
    pub max_retry_delay: Duration,

    /// Only listing entries ending in this suffix are ingested
    pub file_suffix: String,

    /// Branch the raw content is read from
    pub branch: String,

    pub api_base_url: String,
    pub raw_base_url: String,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub database_path: PathBuf,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_attempts: 2,
            retry_delay: Duration::from_secs(2),
            exponential_backoff: false,
            max_retry_delay: Duration::from_secs(30),
            file_suffix: ".json".to_string(),
            branch: "main".to_string(),
            api_base_url: "https://api.github.com".to_string(),
            raw_base_url: "https://raw.githubusercontent.com".to_string(),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("scan-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            database_path: PathBuf::from("./vulnerabilities.db"),
        }
    }
}

impl HarvesterConfig {
    /// Loads `.env` (if any) and applies `HARVESTER_*` overrides to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "HARVESTER_CONCURRENCY")? {
            config.concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "HARVESTER_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(ms) = parse_var(&lookup, "HARVESTER_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var(&lookup, "HARVESTER_EXPONENTIAL_BACKOFF")? {
            config.exponential_backoff = v;
        }
        if let Some(ms) = parse_var(&lookup, "HARVESTER_MAX_RETRY_DELAY_MS")? {
            config.max_retry_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var(&lookup, "HARVESTER_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("HARVESTER_FILE_SUFFIX") {
            config.file_suffix = v;
        }
        if let Some(v) = lookup("HARVESTER_BRANCH") {
            config.branch = v;
        }
        if let Some(v) = lookup("HARVESTER_API_BASE_URL") {
            config.api_base_url = v;
        }
        if let Some(v) = lookup("HARVESTER_RAW_BASE_URL") {
            config.raw_base_url = v;
        }
        if let Some(v) = lookup("HARVESTER_USER_AGENT") {
            config.user_agent = v;
        }
        if let Some(v) = lookup("HARVESTER_DATABASE_PATH") {
            config.database_path = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.file_suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "file_suffix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy derived from the attempt and delay settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = if self.exponential_backoff {
            Backoff::Exponential {
                initial: self.retry_delay,
                max: self.max_retry_delay,
            }
        } else {
            Backoff::Fixed(self.retry_delay)
        };
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_backoff(backoff)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_raw_base_url(mut self, url: impl Into<String>) -> Self {
        self.raw_base_url = url.into();
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
