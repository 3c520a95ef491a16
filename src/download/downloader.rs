//! Streaming file downloader with byte-level progress and whole-transfer retry.
//!
//! [`ProgressDownloader`] sends its requests through a shared
//! [`RetryHttpClient`], so downloads respect the client's headers, proxy and
//! single-slot throttle. Every failure (transport error, non-200 status, size
//! limit, short read) makes the whole transfer eligible for another attempt
//! under the client's [`RetryPolicy`](super::RetryPolicy).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::{Method, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::client::RetryHttpClient;
use super::error::DownloadError;
use super::retry::RetryDecision;

/// Byte-level progress of one transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Source URL.
    pub url: String,
    /// Destination file name (no directory).
    pub filename: String,
    /// Bytes written so far in this attempt.
    pub bytes_downloaded: u64,
    /// Declared content length.
    pub bytes_total: u64,
    /// `bytes_downloaded / bytes_total` as a percentage.
    pub percent: f64,
}

/// Callback invoked after every chunk written, only when a content length is declared.
pub type ProgressCallback = Arc<dyn Fn(&DownloadProgress) + Send + Sync>;

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Final path on disk.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Downloads remote resources to disk.
#[derive(Debug, Clone)]
pub struct ProgressDownloader {
    client: RetryHttpClient,
    base_dir: PathBuf,
    max_file_size: Option<u64>,
}

impl ProgressDownloader {
    /// Creates a downloader rooted at `base_dir` for task-scoped downloads.
    #[must_use]
    pub fn new(client: RetryHttpClient, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            base_dir: base_dir.into(),
            max_file_size: None,
        }
    }

    /// Rejects transfers whose declared content length exceeds `max_bytes`.
    #[must_use]
    pub fn with_max_file_size(mut self, max_bytes: Option<u64>) -> Self {
        self.max_file_size = max_bytes;
        self
    }

    /// Returns the base directory for task-scoped downloads.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the directory holding the files of `task_scope`.
    #[must_use]
    pub fn task_dir(&self, task_scope: &str) -> PathBuf {
        self.base_dir.join(format!("task_{task_scope}"))
    }

    /// Resolves where a download lands.
    ///
    /// With a task scope the file goes to `{base_dir}/task_{scope}/{basename(destination)}`;
    /// otherwise `destination` is used as given.
    #[must_use]
    pub fn resolve_destination(&self, destination: &Path, task_scope: Option<&str>) -> PathBuf {
        match task_scope {
            Some(scope) => {
                let basename = destination
                    .file_name()
                    .map_or_else(|| "download.bin".into(), std::ffi::OsStr::to_os_string);
                self.task_dir(scope).join(basename)
            }
            None => destination.to_path_buf(),
        }
    }

    /// Downloads `url` to `destination`, retrying the whole transfer on failure.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] immediately for a malformed URL,
    /// otherwise [`DownloadError::RetriesExhausted`] wrapping the last attempt's
    /// error once every attempt has failed.
    #[instrument(skip(self, progress), fields(url = %url, task_scope = task_scope.unwrap_or("-")))]
    pub async fn download_file(
        &self,
        url: &str,
        destination: &Path,
        task_scope: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile, DownloadError> {
        let path = self.resolve_destination(destination, task_scope);
        let request = self.client.create_request(Method::GET, url, None)?;
        let policy = self.client.retry_policy();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_request = request
                .try_clone()
                .ok_or_else(|| DownloadError::RequestNotCloneable {
                    url: url.to_string(),
                })?;

            match self
                .transfer_once(attempt_request, url, &path, progress.as_ref())
                .await
            {
                Ok(bytes) => {
                    info!(path = %path.display(), bytes, attempt, "download complete");
                    return Ok(DownloadedFile {
                        path,
                        bytes,
                        attempts: attempt,
                    });
                }
                Err(error) => match policy.should_retry(attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next_attempt,
                    } => {
                        warn!(
                            attempt = next_attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            error = %error,
                            "retrying download"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(%reason, "giving up on download");
                        return Err(DownloadError::retries_exhausted(attempt, error));
                    }
                },
            }
        }
    }

    async fn transfer_once(
        &self,
        request: reqwest::Request,
        url: &str,
        path: &Path,
        progress: Option<&ProgressCallback>,
    ) -> Result<u64, DownloadError> {
        // The slot covers the body too, so one transfer is in flight at a time.
        let (response, _permit) = self.client.execute_holding_slot(request).await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let content_length = response.content_length();
        if let (Some(declared), Some(max_bytes)) = (content_length, self.max_file_size)
            && declared > max_bytes
        {
            return Err(DownloadError::too_large(url, declared, max_bytes));
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let file = File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;

        let tracker = content_length.map(|total| ProgressTracker {
            url: url.to_string(),
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            total,
            callback: progress.cloned(),
        });

        let result = stream_to_file(file, response, url, path, tracker.as_ref())
            .await
            .and_then(|written| match content_length {
                Some(expected) if expected != written => {
                    Err(DownloadError::integrity(path, expected, written))
                }
                _ => Ok(written),
            });

        if result.is_err() {
            debug!(path = %path.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(path).await;
        }
        result
    }
}

struct ProgressTracker {
    url: String,
    filename: String,
    total: u64,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    #[allow(clippy::cast_precision_loss)]
    fn report(&self, bytes_downloaded: u64) {
        let Some(callback) = &self.callback else {
            return;
        };
        let percent = if self.total == 0 {
            100.0
        } else {
            bytes_downloaded as f64 / self.total as f64 * 100.0
        };
        callback(&DownloadProgress {
            url: self.url.clone(),
            filename: self.filename.clone(),
            bytes_downloaded,
            bytes_total: self.total,
            percent,
        });
    }
}

/// Streams the response body to `file`, returning bytes written.
async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &str,
    path: &Path,
    tracker: Option<&ProgressTracker>,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;

        bytes_written += chunk.len() as u64;
        if let Some(tracker) = tracker {
            tracker.report(bytes_written);
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    Ok(bytes_written)
}
