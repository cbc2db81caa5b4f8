//! Task control: start, pause, resume, cancel, retry and delete.

use crate::error::{Error, Result, TaskError};
use crate::types::{Event, Status, StreamProgress, TaskAction, TaskId};

use super::{StopIntent, TaskScheduler, TaskTable};

fn not_found(id: &TaskId) -> Error {
    Error::Task(TaskError::NotFound { id: id.clone() })
}

fn invalid_state(id: &TaskId, operation: &str, current: Status) -> Error {
    Error::Task(TaskError::InvalidState {
        id: id.clone(),
        operation: operation.to_string(),
        current_state: current,
    })
}

impl TaskScheduler {
    /// Apply a control action to a task
    ///
    /// Dispatches to [`start`](Self::start), [`pause`](Self::pause),
    /// [`resume`](Self::resume), [`cancel`](Self::cancel),
    /// [`retry`](Self::retry) or [`delete`](Self::delete).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use dash_dl::*;
    /// # async fn example(scheduler: TaskScheduler, id: TaskId) -> Result<()> {
    /// scheduler.control(&id, TaskAction::Pause).await?;
    /// scheduler.control(&id, TaskAction::Resume).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn control(&self, id: &TaskId, action: TaskAction) -> Result<()> {
        tracing::debug!(task_id = %id, ?action, "control request");
        match action {
            TaskAction::Start => self.start(id).await,
            TaskAction::Pause => self.pause(id).await,
            TaskAction::Resume => self.resume(id).await,
            TaskAction::Cancel => self.cancel(id).await,
            TaskAction::Retry => self.retry(id).await,
            TaskAction::Delete => self.delete(id).await,
        }
    }

    /// Start a task
    ///
    /// A Pending task is admitted if a slot is free (otherwise it keeps its
    /// place in the queue), a Paused task is resumed, and an Active task is
    /// left alone. Terminal tasks must be retried instead.
    pub async fn start(&self, id: &TaskId) -> Result<()> {
        let status = {
            let table = self.table.lock().await;
            table.tasks.get(id).ok_or_else(|| not_found(id))?.status
        };

        match status {
            Status::Pending => {
                let mut table = self.table.lock().await;
                self.admit_pending(&mut table);
                self.persist(&table).await
            }
            Status::Paused => self.resume(id).await,
            Status::Active => Ok(()),
            Status::Completed | Status::Failed | Status::Cancelled => {
                Err(invalid_state(id, "start", status))
            }
        }
    }

    /// Pause an Active task
    ///
    /// The worker is signalled and the task becomes Paused once it has
    /// unwound; partially fetched streams stay in the task's temp directory
    /// so [`resume`](Self::resume) continues from them. Pausing a Paused
    /// task is a no-op.
    pub async fn pause(&self, id: &TaskId) -> Result<()> {
        let mut table = self.table.lock().await;
        let status = table.tasks.get(id).ok_or_else(|| not_found(id))?.status;

        match status {
            Status::Paused => Ok(()),
            Status::Active => {
                signal_worker(&mut table, id, StopIntent::Pause);
                Ok(())
            }
            Status::Pending | Status::Completed | Status::Failed | Status::Cancelled => {
                Err(invalid_state(id, "pause", status))
            }
        }
    }

    /// Resume a Paused task
    ///
    /// The task re-enters the admission queue as Pending, keeping its place
    /// by creation time. Resuming a Pending task, or an Active task with no
    /// pause in flight, is a no-op. Resuming while a pause is still unwinding
    /// requeues the task once its worker stops.
    pub async fn resume(&self, id: &TaskId) -> Result<()> {
        let mut table = self.table.lock().await;
        let task = table.tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        let status = task.status;

        match status {
            Status::Paused => {
                self.set_status(task, Status::Pending, "queued");
                self.admit_pending(&mut table);
                self.persist(&table).await
            }
            Status::Active => {
                // A pause still unwinding turns into a requeue once the worker stops
                if let Some(worker) = table.workers.get_mut(id)
                    && worker.intent == Some(StopIntent::Pause)
                {
                    worker.intent = Some(StopIntent::Requeue);
                    tracing::debug!(task_id = %id, "resume queued behind pending pause");
                }
                Ok(())
            }
            Status::Pending => Ok(()),
            Status::Completed | Status::Failed | Status::Cancelled => {
                Err(invalid_state(id, "resume", status))
            }
        }
    }

    /// Cancel a task
    ///
    /// Pending and Paused tasks become Cancelled immediately; an Active task
    /// becomes Cancelled once its worker has unwound. Cancelling a Cancelled
    /// task is a no-op.
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        let mut table = self.table.lock().await;
        let task = table.tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        let status = task.status;

        match status {
            Status::Pending | Status::Paused => {
                self.set_status(task, Status::Cancelled, "cancelled");
                self.persist(&table).await
            }
            Status::Active => {
                signal_worker(&mut table, id, StopIntent::Cancel);
                Ok(())
            }
            Status::Cancelled => Ok(()),
            Status::Completed | Status::Failed => Err(invalid_state(id, "cancel", status)),
        }
    }

    /// Retry a Failed or Cancelled task
    ///
    /// Progress, per-stream progress and the last error are reset before the
    /// task re-enters the admission queue.
    pub async fn retry(&self, id: &TaskId) -> Result<()> {
        let mut table = self.table.lock().await;
        let task = table.tasks.get_mut(id).ok_or_else(|| not_found(id))?;
        let status = task.status;

        match status {
            Status::Failed | Status::Cancelled => {
                task.overall_progress = 0.0;
                task.stream_progress = StreamProgress::default();
                task.last_error.clear();
                self.set_status(task, Status::Pending, "queued for retry");
                table.persisted_decile.remove(id);
                self.admit_pending(&mut table);
                self.persist(&table).await
            }
            Status::Pending | Status::Active | Status::Paused | Status::Completed => {
                Err(invalid_state(id, "retry", status))
            }
        }
    }

    /// Delete a task in any state
    ///
    /// The task leaves the table and the store at once. A running worker is
    /// cancelled and its temp directory removed when it has unwound;
    /// otherwise the temp directory is removed here. Files already placed in
    /// the destination directory are kept.
    pub async fn delete(&self, id: &TaskId) -> Result<()> {
        let mut table = self.table.lock().await;
        let task = table.tasks.remove(id).ok_or_else(|| not_found(id))?;
        table.persisted_decile.remove(id);

        let running = table.workers.contains_key(id);
        if running {
            signal_worker(&mut table, id, StopIntent::Delete);
        }

        tracing::info!(task_id = %id, status = %task.status, running, "task deleted");
        self.emit_event(Event::Removed { id: id.clone() });
        let persisted = self.persist(&table).await;
        drop(table);

        if !running {
            self.pipeline.remove_temp_dir(id).await;
        }
        persisted
    }
}

/// Record why the worker of `id` must stop and cancel it
pub(crate) fn signal_worker(table: &mut TaskTable, id: &TaskId, intent: StopIntent) {
    if let Some(worker) = table.workers.get_mut(id) {
        // A pause or cancel already in flight is upgraded by delete, never downgraded
        if worker.intent != Some(StopIntent::Delete) {
            worker.intent = Some(intent);
        }
        tracing::debug!(task_id = %id, ?intent, "signalling worker");
        worker.cancel.cancel();
    }
}
