//! Error type for the generation backend.

use std::path::PathBuf;

use thiserror::Error;

use crate::download::DownloadError;

/// Longest response excerpt kept in an error message.
const BODY_EXCERPT_CHARS: usize = 200;

/// A generation call that produced no usable images.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The HTTP request failed after the client's retries.
    #[error("generation request failed: {0}")]
    Request(#[from] DownloadError),

    /// The backend answered with a non-2xx status.
    #[error("generation backend returned HTTP {status} for {url}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        /// Start of the response body.
        body: String,
    },

    /// The response was not the expected JSON.
    #[error("unexpected generation response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// An image in the response was not valid base64.
    #[error("image {index} in generation response is not valid base64: {reason}")]
    InvalidImage { index: usize, reason: String },

    /// Writing a generated image failed.
    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GenerationError {
    /// Creates a [`GenerationError::HttpStatus`] error, keeping only the start of `body`.
    pub fn http_status(url: impl Into<String>, status: u16, body: &str) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            body: body.chars().take(BODY_EXCERPT_CHARS).collect(),
        }
    }

    /// Creates a [`GenerationError::Io`] error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
