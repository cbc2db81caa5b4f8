//! Startup restore, runtime concurrency changes and shutdown.

use crate::error::{Error, Result};
use crate::types::{Event, Status};
use std::time::Duration;

use super::control::signal_worker;
use super::{StopIntent, TaskScheduler};

/// How long shutdown waits for workers to unwind
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for workers
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl TaskScheduler {
    /// Load the persisted tasks into the table
    ///
    /// Tasks that were Active when the previous session ended are restored as
    /// Paused: their worker is gone, but their temp files let a resume pick
    /// up where they stopped. Pending tasks are admitted as capacity allows.
    pub(crate) async fn restore(&self) -> Result<()> {
        let tasks = self.store.load().await?;
        if tasks.is_empty() {
            tracing::info!("no persisted tasks to restore");
            return Ok(());
        }

        let mut table = self.table.lock().await;
        let mut interrupted = 0usize;
        for mut task in tasks {
            if task.status == Status::Active {
                tracing::info!(task_id = %task.id, "restoring interrupted task as paused");
                task.status = Status::Paused;
                task.touch();
                interrupted += 1;
            }
            table.tasks.insert(task.id.clone(), task);
        }

        tracing::info!(
            restored = table.tasks.len(),
            interrupted,
            "task table restored"
        );

        self.admit_pending(&mut table);
        self.persist(&table).await
    }

    /// Change the admission bound at runtime
    ///
    /// Raising the bound admits waiting tasks immediately. Lowering it never
    /// stops running tasks; it only delays further admissions until enough
    /// of them have left Active.
    pub async fn set_max_concurrent(&self, max: usize) -> Result<()> {
        if max < 1 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }

        let mut table = self.table.lock().await;
        tracing::info!(from = table.max_concurrent, to = max, "admission bound changed");
        table.max_concurrent = max;
        self.emit_event(Event::MaxConcurrentChanged { max });
        self.admit_pending(&mut table);
        self.persist(&table).await
    }

    /// Gracefully shut down the scheduler
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting submissions and admissions
    /// 2. Signals every running worker
    /// 3. Waits (bounded) for the workers to unwind; each becomes Paused
    /// 4. Marks any task still Active as Paused and persists the table
    /// 5. Emits [`Event::Shutdown`]
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");
        self.accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);

        {
            let mut table = self.table.lock().await;
            let running: Vec<_> = table.workers.keys().cloned().collect();
            tracing::info!(running = running.len(), "signalling running tasks");
            for id in &running {
                signal_worker(&mut table, id, StopIntent::Shutdown);
            }
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_workers()).await {
            Ok(()) => tracing::info!("all workers stopped"),
            Err(_) => tracing::warn!("timeout waiting for workers, proceeding with shutdown"),
        }

        let persisted = {
            let mut table = self.table.lock().await;
            for task in table.tasks.values_mut() {
                if task.status == Status::Active {
                    tracing::debug!(task_id = %task.id, "marking unfinished task as paused");
                    self.set_status(task, Status::Paused, "interrupted by shutdown");
                }
            }
            self.persist(&table).await
        };

        self.emit_event(Event::Shutdown);
        tracing::info!("graceful shutdown complete");
        persisted
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutting_down(&self) -> bool {
        !self.accepting_new.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn wait_for_workers(&self) {
        loop {
            let running = self.table.lock().await.workers.len();
            if running == 0 {
                return;
            }
            tracing::debug!(running, "waiting for workers to stop");
            tokio::time::sleep(WORKER_POLL_INTERVAL).await;
        }
    }
}
