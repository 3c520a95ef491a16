//! Errors raised by the HTTP client and the downloader.
//!
//! This module defines structured errors for the retrying HTTP client and the
//! progress downloader, providing context-rich error messages for task error
//! text and operator logs.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while issuing requests or downloading files.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Transport failure: DNS, refused connection, TLS, reset.
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// Source error from reqwest.
        #[source]
        source: reqwest::Error,
    },

    /// The client's overall request timeout elapsed.
    #[error("timeout requesting {url}")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// Unexpected HTTP status for a download.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code received.
        status: u16,
    },

    /// File system error during download (create dir, create file, write, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// Destination path.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },

    /// The URL does not parse.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected input.
        url: String,
    },

    /// Bytes written do not match the declared content length.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Destination path.
        path: PathBuf,
        /// Declared size in bytes.
        expected_bytes: u64,
        /// Bytes actually written.
        actual_bytes: u64,
    },

    /// Declared content length exceeds the configured maximum file size.
    #[error("{url} declares {content_length} bytes, above the {max_bytes} byte limit")]
    TooLarge {
        /// The URL being downloaded.
        url: String,
        /// Declared content length.
        content_length: u64,
        /// Configured maximum.
        max_bytes: u64,
    },

    /// Every attempt failed; carries the last error.
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: Box<DownloadError>,
    },

    /// The underlying reqwest client could not be built from configuration.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// Configured proxy URL was rejected.
    #[error("invalid proxy URL {url}: {source}")]
    InvalidProxy {
        /// The proxy URL as configured.
        url: String,
        /// The underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// A configured header value contains characters not allowed in HTTP headers.
    #[error("invalid value for header {name}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
    },

    /// The request body is a stream and cannot be replayed for a retry.
    #[error("request to {url} cannot be retried: body is not cloneable")]
    RequestNotCloneable {
        /// The request URL.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Non-200 answer to a download request.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Filesystem failure at `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Short or long read against the declared content length.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a size-limit error.
    pub fn too_large(url: impl Into<String>, content_length: u64, max_bytes: u64) -> Self {
        Self::TooLarge {
            url: url.into(),
            content_length,
            max_bytes,
        }
    }

    /// Wraps the last error of a retry loop with the attempt count.
    pub fn retries_exhausted(attempts: u32, last: DownloadError) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    /// Returns the error from the final attempt when this is a retry wrapper.
    #[must_use]
    pub fn last_error(&self) -> &DownloadError {
        match self {
            Self::RetriesExhausted { source, .. } => source.last_error(),
            other => other,
        }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// url or path the source errors don't carry.
