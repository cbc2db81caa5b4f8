//! Worker reports: progress, titles, logs and terminal outcomes.

use crate::pipeline::{PipelineReport, ReportSink, TerminalOutcome};
use crate::types::{Event, Status, Task, TaskId};

use super::{StopIntent, TaskScheduler, TaskTable, WorkerMessage};

/// [`ReportSink`] handed to one worker, forwarding into the report loop
pub(crate) struct WorkerSink {
    id: TaskId,
    tx: tokio::sync::mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerSink {
    pub(crate) fn new(id: TaskId, tx: tokio::sync::mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { id, tx }
    }
}

impl ReportSink for WorkerSink {
    fn report(&self, report: PipelineReport) {
        self.tx
            .send(WorkerMessage::Report(self.id.clone(), report))
            .ok();
    }
}

/// Progress decile used to throttle progress-only writes
fn decile(percent: f32) -> u8 {
    (percent.clamp(0.0, 100.0) / 10.0).floor() as u8
}

impl TaskScheduler {
    /// Spawn the loop that applies worker messages to the task table
    ///
    /// Messages from one worker arrive in the order they were sent, so a
    /// task's progress reports are always applied before its outcome.
    pub(crate) fn spawn_report_loop(
        &self,
        mut rx: tokio::sync::mpsc::UnboundedReceiver<WorkerMessage>,
    ) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    WorkerMessage::Report(id, report) => scheduler.apply_report(&id, report).await,
                    WorkerMessage::Finished(id, outcome) => {
                        scheduler.apply_outcome(&id, outcome).await
                    }
                }
            }
        })
    }

    /// Change a task's status and announce it
    ///
    /// Edges outside the task state graph are refused and logged.
    pub(crate) fn set_status(&self, task: &mut Task, status: Status, message: &str) -> bool {
        if !task.status.can_transition_to(status) {
            tracing::warn!(
                task_id = %task.id,
                from = %task.status,
                to = %status,
                "refusing invalid status transition"
            );
            return false;
        }

        tracing::info!(task_id = %task.id, from = %task.status, to = %status, "status changed");
        task.status = status;
        task.touch();
        self.emit_event(Event::StatusChanged {
            id: task.id.clone(),
            status,
            message: message.to_string(),
        });
        true
    }

    async fn apply_report(&self, id: &TaskId, report: PipelineReport) {
        let mut table = self.table.lock().await;
        let TaskTable {
            tasks,
            persisted_decile,
            ..
        } = &mut *table;

        // Reports from a worker whose task was deleted
        let Some(task) = tasks.get_mut(id) else {
            return;
        };

        let persist = match report {
            PipelineReport::Progress { percent, message } => {
                if task.status != Status::Active {
                    return;
                }
                // Progress never goes backwards while the task runs
                let percent = percent.clamp(0.0, 100.0).max(task.overall_progress);
                task.overall_progress = percent;
                self.emit_event(Event::Progress {
                    id: id.clone(),
                    percent,
                    message,
                });

                let bucket = decile(percent);
                let last = persisted_decile.get(id).copied().unwrap_or(0);
                if bucket > last {
                    persisted_decile.insert(id.clone(), bucket);
                    task.touch();
                    true
                } else {
                    false
                }
            }
            PipelineReport::StreamProgress { stream, percent } => {
                task.stream_progress.set(stream, percent);
                self.emit_event(Event::StreamProgress {
                    id: id.clone(),
                    stream,
                    percent: task.stream_progress.get(stream),
                });
                false
            }
            PipelineReport::TitleResolved { title } => {
                tracing::info!(task_id = %id, title = %title, "title resolved");
                task.title = title.clone();
                task.touch();
                self.emit_event(Event::TitleResolved {
                    id: id.clone(),
                    title,
                });
                true
            }
            PipelineReport::Log { text } => {
                tracing::debug!(task_id = %id, "{}", text);
                self.emit_event(Event::Log {
                    id: Some(id.clone()),
                    text,
                });
                false
            }
        };

        if persist {
            self.persist_logged(&table).await;
        }
    }

    async fn apply_outcome(&self, id: &TaskId, outcome: TerminalOutcome) {
        let mut table = self.table.lock().await;
        let intent = table.workers.remove(id).and_then(|w| w.intent);

        if !table.tasks.contains_key(id) {
            // Deleted while running: the worker has unwound, drop its temp files
            drop(table);
            tracing::debug!(task_id = %id, ?outcome, "worker of deleted task finished");
            self.pipeline.remove_temp_dir(id).await;
            let mut table = self.table.lock().await;
            self.admit_pending(&mut table);
            self.persist_logged(&table).await;
            return;
        }

        if let Some(task) = table.tasks.get_mut(id) {
            match outcome {
                TerminalOutcome::Completed => {
                    // A refused transition leaves the record untouched
                    if self.set_status(task, Status::Completed, "completed") {
                        task.overall_progress = 100.0;
                        task.last_error.clear();
                        tracing::info!(task_id = %id, title = %task.display_title(), "task completed");
                    }
                }
                TerminalOutcome::Failed(message) => {
                    if self.set_status(task, Status::Failed, &message) {
                        tracing::warn!(task_id = %id, error = %message, "task failed");
                        task.last_error = message;
                    }
                }
                TerminalOutcome::Cancelled => match intent {
                    Some(StopIntent::Cancel) => {
                        self.set_status(task, Status::Cancelled, "cancelled");
                    }
                    Some(StopIntent::Shutdown) => {
                        self.set_status(task, Status::Paused, "interrupted by shutdown");
                    }
                    Some(StopIntent::Requeue) => {
                        self.set_status(task, Status::Paused, "paused");
                        self.set_status(task, Status::Pending, "queued");
                    }
                    Some(StopIntent::Pause) | Some(StopIntent::Delete) | None => {
                        self.set_status(task, Status::Paused, "paused");
                    }
                },
            }
        }

        table.persisted_decile.remove(id);
        self.admit_pending(&mut table);
        self.persist_logged(&table).await;
    }
}
