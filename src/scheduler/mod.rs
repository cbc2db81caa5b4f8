//! Task scheduler split into focused submodules.
//!
//! The `TaskScheduler` struct and its methods are organized by domain:
//! - [`submit`] - Task creation and id allocation
//! - [`control`] - Start, pause, resume, cancel, retry and delete
//! - [`admission`] - Promotion of pending tasks into worker slots
//! - [`reports`] - Worker progress and outcome handling
//! - [`lifecycle`] - Startup restore, runtime concurrency changes and shutdown
//! - [`queries`] - Read-only views of the task table
//!
//! The scheduler is the single owner of the task table. Workers never touch
//! task records: they send [`WorkerMessage`]s over a channel, and one report
//! loop applies them under the table lock, persisting as it goes.

mod admission;
mod control;
mod lifecycle;
mod queries;
mod reports;
mod submit;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::{Components, DownloadPipeline, PipelineReport, TerminalOutcome};
use crate::store::{JsonTaskStore, TaskStore};
use crate::types::{Event, Task, TaskId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use tokio_util::sync::CancellationToken;

/// Why a running worker was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopIntent {
    /// Pause request; the task becomes Paused
    Pause,
    /// Cancel request; the task becomes Cancelled
    Cancel,
    /// Delete request; the task is already gone from the table
    Delete,
    /// Scheduler shutdown; the task becomes Paused
    Shutdown,
    /// Paused, then resumed before the worker unwound; the task goes back to Pending
    Requeue,
}

/// A worker bound to an Active task
pub(crate) struct WorkerHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) intent: Option<StopIntent>,
}

/// Message from a worker to the report loop
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Report(TaskId, PipelineReport),
    Finished(TaskId, TerminalOutcome),
}

/// Tasks, bound workers and the admission bound, guarded by one lock
pub(crate) struct TaskTable {
    pub(crate) tasks: HashMap<TaskId, Task>,
    /// Capacity is counted in bound workers, including ones still unwinding
    pub(crate) workers: HashMap<TaskId, WorkerHandle>,
    pub(crate) max_concurrent: usize,
    /// Last persisted progress decile per task
    pub(crate) persisted_decile: HashMap<TaskId, u8>,
}

impl TaskTable {
    /// Tasks ordered oldest first
    pub(crate) fn ordered(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        tasks
    }
}

/// Main scheduler instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TaskScheduler {
    /// Task table (single logical owner of all task state)
    pub(crate) table: Arc<tokio::sync::Mutex<TaskTable>>,
    /// Persisted task store, rewritten on every state-affecting change
    pub(crate) store: Arc<dyn TaskStore>,
    /// Per-task download pipeline shared by all workers
    pub(crate) pipeline: Arc<DownloadPipeline>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Channel workers report into
    pub(crate) worker_tx: tokio::sync::mpsc::UnboundedSender<WorkerMessage>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Flag to indicate whether new tasks are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Sequence number for task ids
    pub(crate) next_seq: Arc<AtomicU64>,
}

impl TaskScheduler {
    /// Create a scheduler with HTTP resolution, HTTP fetching, the configured
    /// muxer and a JSON task store at `persistence.tasks_file`
    ///
    /// Tasks from a previous session are restored; see
    /// [`with_components`](Self::with_components).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dash_dl::{Config, TaskOptions, TaskScheduler};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let scheduler = TaskScheduler::new(Config::default()).await?;
    ///
    ///     let mut events = scheduler.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             println!("{:?}", event);
    ///         }
    ///     });
    ///
    ///     scheduler
    ///         .submit("https://www.bilibili.com/video/BV1xx411c7mD", TaskOptions::default())
    ///         .await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let components = Components::from_config(&config)?;
        let store = Arc::new(JsonTaskStore::new(config.persistence.tasks_file.clone()));
        Self::with_components(config, components, store).await
    }

    /// Create a scheduler over explicit components and store
    ///
    /// This initializes all core parts:
    /// - Creates the download and temp directories
    /// - Loads persisted tasks; tasks that were Active are restored as Paused
    /// - Starts the report loop and admits restored Pending tasks
    pub async fn with_components(
        config: Config,
        components: Components,
        store: Arc<dyn TaskStore>,
    ) -> Result<Self> {
        for (dir, what) in [
            (config.download_dir(), "download"),
            (config.temp_dir(), "temp"),
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create {} directory '{}': {}",
                        what,
                        dir.display(),
                        e
                    ),
                ))
            })?;
        }

        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        let (worker_tx, worker_rx) = tokio::sync::mpsc::unbounded_channel();

        let table = TaskTable {
            tasks: HashMap::new(),
            workers: HashMap::new(),
            max_concurrent: config.download.max_concurrent_downloads,
            persisted_decile: HashMap::new(),
        };

        let scheduler = Self {
            table: Arc::new(tokio::sync::Mutex::new(table)),
            store,
            pipeline: Arc::new(DownloadPipeline::new(components, &config)),
            event_tx,
            worker_tx,
            config: Arc::new(config),
            accepting_new: Arc::new(AtomicBool::new(true)),
            next_seq: Arc::new(AtomicU64::new(1)),
        };

        scheduler.spawn_report_loop(worker_rx);
        scheduler.restore().await?;

        Ok(scheduler)
    }

    /// Subscribe to task events
    ///
    /// Each subscriber receives every event independently. A subscriber that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the configuration the scheduler was built with
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers; dropped when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Write the whole table to the store
    pub(crate) async fn persist(&self, table: &TaskTable) -> Result<()> {
        let tasks: Vec<Task> = table.ordered().into_iter().cloned().collect();
        self.store.save(&tasks).await
    }

    /// [`persist`](Self::persist) for callers that cannot surface the error
    pub(crate) async fn persist_logged(&self, table: &TaskTable) {
        if let Err(e) = self.persist(table).await {
            tracing::error!(error = %e, "failed to persist task table");
        }
    }
}
