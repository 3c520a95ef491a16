//! Engine settings.
//!
//! [`EngineSettings`] carries everything the execution engine needs to build
//! per-task adapters: where files go, which remote endpoints to talk to, and
//! the network defaults a task config may override.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::download::RetryPolicy;
use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_PROXY_PROBE_URL, DEFAULT_REQUEST_DELAY, DEFAULT_RETRY_COUNT,
    REQUEST_TIMEOUT_SECS,
};

/// Minimum worker ceiling.
pub const MIN_CONCURRENT_TASKS: usize = 1;

/// Maximum worker ceiling.
pub const MAX_CONCURRENT_TASKS: usize = 100;

/// Default worker ceiling.
pub const DEFAULT_CONCURRENT_TASKS: usize = 10;

/// Upper bound on the configurable retry count.
pub const MAX_RETRY_COUNT: u32 = 10;

/// Default catalog API base URL.
pub const DEFAULT_CATALOG_BASE_URL: &str = "https://www.pixiv.net";

/// Default generation backend base URL.
pub const DEFAULT_GENERATION_BASE_URL: &str = "http://127.0.0.1:7860";

/// Invalid engine settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Worker ceiling outside the allowed range.
    #[error(
        "invalid max_concurrent_tasks {value}: must be between {MIN_CONCURRENT_TASKS} and {MAX_CONCURRENT_TASKS}"
    )]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// Retry count above the allowed maximum.
    #[error("invalid retry_count {value}: must be between 0 and {MAX_RETRY_COUNT}")]
    InvalidRetryCount {
        /// The rejected value.
        value: u32,
    },

    /// A base URL does not parse or is not http(s).
    #[error("invalid {field} '{value}': expected an http(s) URL")]
    InvalidUrl {
        /// Setting name.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A timeout of zero.
    #[error("invalid {field}: must be greater than zero")]
    ZeroTimeout {
        /// Setting name.
        field: &'static str,
    },

    /// Maximum file size of zero.
    #[error("invalid max_file_size: must be greater than zero when set")]
    ZeroMaxFileSize,
}

/// Settings for the execution engine and the adapters it builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Root directory for task output (`{root}/task_{id}/...`).
    pub download_root: PathBuf,
    /// Catalog API base URL.
    pub catalog_base_url: String,
    /// Generation backend base URL.
    pub generation_base_url: String,
    /// TCP connect timeout for every client.
    pub connect_timeout: Duration,
    /// Overall request timeout for every client.
    pub request_timeout: Duration,
    /// Additional attempts after the first for requests and downloads.
    pub retry_count: u32,
    /// Base delay of the retry backoff.
    pub retry_base_delay: Duration,
    /// Cap of the retry backoff.
    pub retry_max_delay: Duration,
    /// Largest accepted download; `None` for no limit.
    pub max_file_size: Option<u64>,
    /// Politeness delay when a crawl config does not set one.
    pub default_request_delay: Duration,
    /// URL probed by the connectivity self-test.
    pub proxy_probe_url: String,
    /// Workers allowed to execute at the same time.
    pub max_concurrent_tasks: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            download_root: PathBuf::from("downloads"),
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            generation_base_url: DEFAULT_GENERATION_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_base_delay: retry.delay_before_attempt(2),
            retry_max_delay: retry.delay_before_attempt(u32::MAX),
            max_file_size: None,
            default_request_delay: DEFAULT_REQUEST_DELAY,
            proxy_probe_url: DEFAULT_PROXY_PROBE_URL.to_string(),
            max_concurrent_tasks: DEFAULT_CONCURRENT_TASKS,
        }
    }
}

impl EngineSettings {
    /// Checks every setting, returning the first problem found.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the offending setting and its valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENT_TASKS..=MAX_CONCURRENT_TASKS).contains(&self.max_concurrent_tasks) {
            return Err(ConfigError::InvalidConcurrency {
                value: self.max_concurrent_tasks,
            });
        }
        if self.retry_count > MAX_RETRY_COUNT {
            return Err(ConfigError::InvalidRetryCount {
                value: self.retry_count,
            });
        }
        validate_http_url("catalog_base_url", &self.catalog_base_url)?;
        validate_http_url("generation_base_url", &self.generation_base_url)?;
        validate_http_url("proxy_probe_url", &self.proxy_probe_url)?;
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "connect_timeout",
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "request_timeout",
            });
        }
        if self.max_file_size == Some(0) {
            return Err(ConfigError::ZeroMaxFileSize);
        }
        Ok(())
    }

    /// Retry policy derived from these settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, self.retry_base_delay, self.retry_max_delay)
    }
}

fn validate_http_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}
