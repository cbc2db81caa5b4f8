//! # dash-dl
//!
//! Download manager for pages that serve video and audio as separate DASH
//! streams.
//!
//! ## Design Philosophy
//!
//! dash-dl is designed to be:
//! - **Resumable** - Stream fetches continue from the bytes already on disk
//! - **Bounded** - At most `max_concurrent_downloads` tasks run at once
//! - **Library-first** - The CLI is a thin shell over [`TaskScheduler`]
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! A task goes through page resolution ([`resolver`]), one resumable fetch
//! per elementary stream ([`fetcher`]) and an external mux step
//! ([`muxer`]), orchestrated per task by the [`pipeline`] and admitted by
//! the [`scheduler`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use dash_dl::{Config, StreamSelection, TaskOptions, TaskScheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = TaskScheduler::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = scheduler.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     scheduler
//!         .submit(
//!             "https://www.bilibili.com/video/BV1xx411c7mD?p=1",
//!             TaskOptions {
//!                 stream_selection: StreamSelection::Full,
//!                 ..Default::default()
//!             },
//!         )
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Resumable HTTP stream transfer
pub mod fetcher;
/// Shared HTTP client construction
pub mod http;
/// External stream multiplexer
pub mod muxer;
/// Per-task download pipeline
pub mod pipeline;
/// Page resolution and series expansion
pub mod resolver;
/// Retry logic with fixed or exponential backoff
pub mod retry;
/// Task scheduler (decomposed into focused submodules)
pub mod scheduler;
/// Persisted task store
pub mod store;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, FileCollisionAction};
pub use error::{Error, FetchError, MuxError, ResolveError, Result, TaskError};
pub use fetcher::{HttpStreamFetcher, StreamFetcher};
pub use muxer::{FfmpegMuxer, Muxer};
pub use pipeline::{Components, DownloadPipeline, TerminalOutcome};
pub use resolver::{HttpPageResolver, PageResolver, SeriesExpander, VideoInfo};
pub use scheduler::TaskScheduler;
pub use store::{JsonTaskStore, MemoryTaskStore, TaskStore};
pub use types::{
    Event, QueueStats, Status, StreamKind, StreamProgress, StreamSelection, Task, TaskAction,
    TaskId, TaskOptions,
};

/// Helper function to run the scheduler with graceful signal handling.
///
/// Waits for a termination signal and then calls the scheduler's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use dash_dl::{Config, TaskScheduler, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let scheduler = TaskScheduler::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(scheduler).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(scheduler: TaskScheduler) -> Result<()> {
    wait_for_signal().await;
    scheduler.shutdown().await
}

/// Resolve on SIGTERM or SIGINT (Ctrl+C elsewhere)
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

/// Resolve on SIGTERM or SIGINT (Ctrl+C elsewhere)
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
