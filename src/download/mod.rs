//! Outbound HTTP and file downloads.
//!
//! - [`RetryHttpClient`]: configurable headers and proxy, one request in flight
//!   per client, transport-level retry with capped exponential backoff.
//! - [`ProgressDownloader`]: streams a resource to disk with byte-level
//!   progress and retries the whole transfer on any failure.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use taskhub_core::download::{ClientConfig, ProgressDownloader, RetryHttpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RetryHttpClient::new(ClientConfig::default())?;
//! let downloader = ProgressDownloader::new(client, "./downloads");
//! let file = downloader
//!     .download_file("https://example.com/1_p0.png", Path::new("1_p0.png"), Some("task-1"), None)
//!     .await?;
//! println!("saved {} bytes to {}", file.bytes, file.path.display());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod downloader;
mod error;
mod filename;
mod retry;
mod throttle;

pub use client::{ClientConfig, RetryHttpClient};
pub use downloader::{DownloadProgress, DownloadedFile, ProgressCallback, ProgressDownloader};
pub use error::DownloadError;
pub use filename::{item_page_filename, sanitize_filename};
pub use retry::{RetryDecision, RetryPolicy};
pub use throttle::{GatePermit, RequestGate};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
