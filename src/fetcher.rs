//! Resumable elementary-stream transfer
//!
//! [`HttpStreamFetcher`] downloads one HTTP resource into a local file. When the
//! file already holds `S > 0` bytes the request carries `Range: bytes=S-` and the
//! response is appended, so bytes already on disk are never fetched again, not
//! even across retries: every attempt re-reads the on-disk size first.

use crate::config::{FetchConfig, RetryConfig};
use crate::error::FetchError;
use crate::retry::{IsRetryable, download_with_retry};
use crate::utils::file_len;
use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Bytes on disk so far and the total size, when the server reported one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    /// Bytes present in the destination file
    pub downloaded: u64,
    /// Size of the complete resource
    pub total: Option<u64>,
}

impl FetchProgress {
    /// Completion percentage, when the total is known
    pub fn percent(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => {
                Some(((self.downloaded as f64 / total as f64) * 100.0).min(100.0) as f32)
            }
            _ => None,
        }
    }
}

/// Non-error result of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The whole resource is on disk
    Completed {
        /// Final file size
        bytes: u64,
        /// Size reported by the server, if any
        total: Option<u64>,
    },
    /// Stopped by the cancellation token; the partial file is kept
    Cancelled {
        /// Bytes on disk when the fetch stopped
        bytes: u64,
    },
}

/// Progress callback handed to [`StreamFetcher::fetch`]
pub type ProgressCallback<'a> = &'a (dyn Fn(FetchProgress) + Send + Sync);

/// Downloads one elementary stream to a local file
#[async_trait]
pub trait StreamFetcher: Send + Sync {
    /// Fetch `url` into `dest`, resuming from whatever `dest` already holds
    ///
    /// `on_progress` is called at a byte-count cadence with non-decreasing
    /// values, and once more when the transfer ends.
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError>;
}

/// [`StreamFetcher`] over HTTP with byte-range resume and bounded retry
#[derive(Clone, Debug)]
pub struct HttpStreamFetcher {
    client: Client,
    retry: RetryConfig,
    progress_interval: u64,
}

impl HttpStreamFetcher {
    /// Fetcher using `client` with the retry policy and cadence from `config`
    pub fn new(client: Client, config: &FetchConfig) -> Self {
        Self {
            client,
            retry: config.retry_config(),
            progress_interval: config.progress_interval_bytes(),
        }
    }

    /// Override the progress cadence in bytes
    pub fn with_progress_interval(mut self, bytes: u64) -> Self {
        self.progress_interval = bytes.max(1);
        self
    }

    async fn attempt(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        loop {
            let offset = file_len(dest).await.map_err(|e| filesystem(dest, e))?;

            let mut request = self.client.get(url);
            if offset > 0 {
                request = request.header(RANGE, format!("bytes={}-", offset));
            }
            let response = request.send().await?;
            let status = response.status();

            let (append, start, total) = match status {
                StatusCode::PARTIAL_CONTENT if offset > 0 => {
                    let total = content_range_total(&response)
                        .or_else(|| response.content_length().map(|len| len + offset));
                    tracing::debug!(url, offset, ?total, "resuming stream");
                    (true, offset, total)
                }
                StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                    match content_range_total(&response) {
                        Some(total) if total != offset => {
                            tracing::warn!(
                                path = %dest.display(),
                                on_disk = offset,
                                total,
                                "partial file does not match remote size, restarting"
                            );
                            tokio::fs::remove_file(dest)
                                .await
                                .map_err(|e| filesystem(dest, e))?;
                            continue;
                        }
                        _ => {
                            tracing::debug!(url, bytes = offset, "stream already complete");
                            on_progress(FetchProgress {
                                downloaded: offset,
                                total: Some(offset),
                            });
                            return Ok(FetchOutcome::Completed {
                                bytes: offset,
                                total: Some(offset),
                            });
                        }
                    }
                }
                s if s.is_success() => {
                    if offset > 0 {
                        tracing::warn!(url, offset, "server ignored range request, restarting");
                    }
                    let total = content_range_total(&response).or(response.content_length());
                    (false, 0, total)
                }
                s => return Err(FetchError::HttpStatus { status: s.as_u16() }),
            };

            return self
                .write_body(response, dest, append, start, total, on_progress, cancel)
                .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_body(
        &self,
        mut response: Response,
        dest: &Path,
        append: bool,
        start: u64,
        total: Option<u64>,
        on_progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| filesystem(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(dest)
            .await
            .map_err(|e| filesystem(dest, e))?;

        let mut downloaded = start;
        let mut next_report = downloaded.saturating_add(self.progress_interval);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    file.flush().await.map_err(|e| filesystem(dest, e))?;
                    tracing::debug!(path = %dest.display(), bytes = downloaded, "fetch cancelled");
                    return Ok(FetchOutcome::Cancelled { bytes: downloaded });
                }
                chunk = response.chunk() => match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        // Settle buffered writes so a retry resumes from the true on-disk size
                        if let Err(flush_err) = file.flush().await {
                            tracing::warn!(path = %dest.display(), error = %flush_err, "flush after body error failed");
                        }
                        return Err(e.into());
                    }
                },
            };

            let Some(chunk) = chunk else { break };
            file.write_all(&chunk)
                .await
                .map_err(|e| filesystem(dest, e))?;
            downloaded += chunk.len() as u64;

            if downloaded >= next_report {
                on_progress(FetchProgress { downloaded, total });
                next_report = downloaded.saturating_add(self.progress_interval);
            }
        }

        file.flush().await.map_err(|e| filesystem(dest, e))?;
        on_progress(FetchProgress { downloaded, total });

        if let Some(expected) = total
            && expected != downloaded
        {
            tracing::warn!(
                path = %dest.display(),
                expected,
                actual = downloaded,
                "downloaded size does not match server-reported size"
            );
        }

        Ok(FetchOutcome::Completed {
            bytes: downloaded,
            total,
        })
    }
}

#[async_trait]
impl StreamFetcher for HttpStreamFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let bytes = file_len(dest).await.map_err(|e| filesystem(dest, e))?;
                return Ok(FetchOutcome::Cancelled { bytes });
            }
            result = download_with_retry(&self.retry, move || {
                self.attempt(url, dest, on_progress, cancel)
            }) => result,
        };

        result.map_err(|e| {
            if e.is_retryable() {
                FetchError::RetriesExhausted {
                    attempts: self.retry.max_attempts + 1,
                    last_error: e.to_string(),
                }
            } else {
                e
            }
        })
    }
}

fn filesystem(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}

/// Total size from `Content-Range: bytes a-b/N` or `bytes */N`
fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
}

fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}
