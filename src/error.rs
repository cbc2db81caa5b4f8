//! Error types for dash-dl
//!
//! This module provides the error hierarchy for the library:
//! - [`Error`] is the crate-wide error returned by the public API
//! - [`ResolveError`], [`FetchError`] and [`MuxError`] are typed outcomes of the
//!   leaf components (page resolution, stream transfer, external mux)
//! - [`TaskError`] covers task-table lookups and invalid state transitions
//!
//! Leaf components return these as values; the download pipeline folds them
//! into a single human-readable message per task. Cancellation is never an
//! error: it is reported through the `Cancelled` variants of the outcome enums.

use crate::types::{Status, TaskId};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dash-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of characters of offending page text kept in a [`ResolveError`]
pub const SNIPPET_MAX_CHARS: usize = 200;

/// Main error type for dash-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Task lookup or state transition error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Page resolution failed
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Stream transfer failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// External multiplexer failed
    #[error("mux error: {0}")]
    Mux(#[from] MuxError),

    /// Persisted task store could not be read or written
    #[error("task store error: {0}")]
    Store(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A destination file already exists and the collision policy forbids replacing it
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The path where the collision occurred
        path: PathBuf,
        /// Why the path could not be used
        reason: String,
    },

    /// A path could not be decomposed into parent/stem/extension
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path
        path: PathBuf,
        /// What was missing
        reason: String,
    },

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,
}

/// Task-table errors raised by control operations
#[derive(Debug, Error)]
pub enum TaskError {
    /// No task with this id exists
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: TaskId,
    },

    /// The requested action is not a valid transition from the current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID
        id: TaskId,
        /// The operation that was attempted (e.g., "pause", "retry")
        operation: String,
        /// The state that prevents the operation
        current_state: Status,
    },
}

/// Failure to turn a content page into stream URLs
///
/// Resolution is all-or-nothing: a page with a title but no playback info is
/// as much a failure as a page that could not be fetched.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The page URL could not be parsed
    #[error("invalid page URL {url}: {reason}")]
    InvalidUrl {
        /// The URL as given
        url: String,
        /// Parser message
        reason: String,
    },

    /// Connect, timeout or body-read failure while fetching the page
    #[error("failed to fetch {url}: {source}")]
    Network {
        /// The page URL
        url: String,
        /// Underlying HTTP client error
        #[source]
        source: reqwest::Error,
    },

    /// The page responded with something other than 200
    #[error("{url} returned HTTP {status}")]
    HttpStatus {
        /// The page URL
        url: String,
        /// Response status code
        status: u16,
    },

    /// No `<title>` element in the markup
    #[error("no title found in page markup")]
    MissingTitle,

    /// No embedded playback-info blob in the markup
    #[error("no playback info found in page markup")]
    MissingPlayInfo,

    /// The playback-info blob is not valid JSON or has the wrong shape
    #[error("malformed playback info ({reason}): {snippet}")]
    MalformedPlayInfo {
        /// Parser or shape message
        reason: String,
        /// Offending text, truncated to [`SNIPPET_MAX_CHARS`]
        snippet: String,
    },

    /// The playback info lists neither a video nor an audio stream
    #[error("playback info lists no video or audio streams")]
    NoStreams,
}

impl ResolveError {
    /// Build a [`ResolveError::MalformedPlayInfo`] keeping only the head of the raw text
    pub fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        Self::MalformedPlayInfo {
            reason: reason.into(),
            snippet: truncate_chars(raw, SNIPPET_MAX_CHARS),
        }
    }
}

/// Failure to transfer one elementary stream to disk
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connect, timeout or body-read failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The stream server answered with an unusable status
    #[error("stream server returned HTTP {status}")]
    HttpStatus {
        /// Response status code
        status: u16,
    },

    /// The local file could not be opened, written or inspected
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// The file being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Every attempt failed with a retryable error
    #[error("giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made (initial + retries)
        attempts: u32,
        /// Message of the final failure
        last_error: String,
    },
}

/// Failure of the external multiplexer step
///
/// The first four variants are precondition failures detected before any
/// process is spawned; the rest describe a process that ran and failed.
#[derive(Debug, Error)]
pub enum MuxError {
    /// No muxer path configured and none found on PATH
    #[error("muxer executable not configured and not found on PATH")]
    Unavailable,

    /// The configured muxer path does not exist
    #[error("muxer executable not found at {0}")]
    NotFound(PathBuf),

    /// The configured muxer path exists but cannot be executed
    #[error("muxer at {0} is not executable")]
    NotExecutable(PathBuf),

    /// One of the elementary input files is missing
    #[error("mux input missing: {0}")]
    MissingInput(PathBuf),

    /// The process could not be launched
    #[error("failed to launch muxer: {0}")]
    Spawn(#[source] std::io::Error),

    /// The process exited unsuccessfully
    #[error("muxer exited with code {exit_code:?}: {stderr}")]
    Execution {
        /// Exit code, if the process was not killed by a signal
        exit_code: Option<i32>,
        /// Tail of the process diagnostics
        stderr: String,
    },

    /// The process reported success but wrote nothing
    #[error("muxer reported success but produced no output at {0}")]
    MissingOutput(PathBuf),
}

impl MuxError {
    /// True for failures detected before the muxer was launched
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            MuxError::Unavailable
                | MuxError::NotFound(_)
                | MuxError::NotExecutable(_)
                | MuxError::MissingInput(_)
        )
    }
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}…", &text[..byte_idx]),
        None => text.to_string(),
    }
}
