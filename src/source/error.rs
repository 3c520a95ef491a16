//! Error type for catalog queries.

use thiserror::Error;

use crate::download::DownloadError;

/// A catalog query that could not produce items.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The HTTP request failed after the client's retries.
    #[error("catalog request failed: {0}")]
    Request(#[from] DownloadError),

    /// The catalog answered with a non-2xx status.
    #[error("catalog returned HTTP {status} for {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The catalog reported an error in its response envelope.
    #[error("catalog error for {url}: {message}")]
    Api {
        /// Requested URL.
        url: String,
        /// Message from the envelope, or a placeholder when it was empty.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected catalog response from {url}: {reason}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Parser message.
        reason: String,
    },
}

impl CatalogError {
    /// Creates a [`CatalogError::Api`] error; a blank message is replaced.
    pub fn api(url: impl Into<String>, message: &str) -> Self {
        let message = if message.trim().is_empty() {
            "request rejected".to_string()
        } else {
            message.trim().to_string()
        };
        Self::Api {
            url: url.into(),
            message,
        }
    }

    /// Creates a [`CatalogError::Decode`] error.
    pub fn decode(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
