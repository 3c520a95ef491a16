//! Constants for the download module (timeouts, retry, size limits).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default overall request timeout (5 minutes for large files).
pub const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Default number of additional attempts after the first one.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Base delay for exponential backoff (1 second).
pub const BACKOFF_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a single backoff delay (30 seconds).
pub const BACKOFF_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default fixed delay applied before every request (politeness throttle).
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(1000);

/// Default referer sent to the catalog and image hosts.
pub const DEFAULT_REFERER: &str = "https://www.pixiv.net/";

/// Default Accept-Language header.
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Default URL probed by the proxy connectivity self-test.
pub const DEFAULT_PROXY_PROBE_URL: &str = "https://www.pixiv.net/";
