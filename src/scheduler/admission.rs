//! Admission control: promote Pending tasks into free worker slots.

use crate::pipeline::PipelineJob;
use crate::types::{Status, Task, TaskId};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::reports::WorkerSink;
use super::{TaskScheduler, TaskTable, WorkerHandle, WorkerMessage};

impl TaskScheduler {
    /// Promote the oldest Pending tasks while capacity allows
    ///
    /// Called after every change that can free a slot or add a candidate:
    /// submit, resume, retry, a worker finishing, and a raised bound.
    pub(crate) fn admit_pending(&self, table: &mut TaskTable) {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return;
        }

        while table.workers.len() < table.max_concurrent {
            let Some(id) = next_pending(table) else {
                break;
            };
            self.spawn_worker(table, &id);
        }
    }

    /// Mark `id` Active, bind a worker and start its pipeline
    fn spawn_worker(&self, table: &mut TaskTable, id: &TaskId) {
        let Some(task) = table.tasks.get_mut(id) else {
            return;
        };
        self.set_status(task, Status::Active, "started");
        let job = PipelineJob::from_task(task);

        let cancel = CancellationToken::new();
        table.workers.insert(
            id.clone(),
            WorkerHandle {
                cancel: cancel.clone(),
                intent: None,
            },
        );

        tracing::info!(
            task_id = %id,
            active = table.workers.len(),
            max_concurrent = table.max_concurrent,
            "task admitted"
        );

        let pipeline = self.pipeline.clone();
        let worker_tx = self.worker_tx.clone();
        tokio::spawn(async move {
            let sink = WorkerSink::new(job.id.clone(), worker_tx.clone());
            let outcome = pipeline.run(&job, &sink, &cancel).await;
            // The report loop outlives every worker; a closed channel means the
            // runtime is going away
            worker_tx.send(WorkerMessage::Finished(job.id, outcome)).ok();
        });
    }
}

/// Oldest Pending task without a bound worker
fn next_pending(table: &TaskTable) -> Option<TaskId> {
    table
        .tasks
        .values()
        .filter(|t| t.status == Status::Pending && !table.workers.contains_key(&t.id))
        .min_by(|a, b| admission_key(a).cmp(&admission_key(b)))
        .map(|t| t.id.clone())
}

fn admission_key(task: &Task) -> (chrono::DateTime<chrono::Utc>, &TaskId) {
    (task.created_at, &task.id)
}
