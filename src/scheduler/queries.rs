//! Read-only views of the task table.

use crate::error::{Result, TaskError};
use crate::types::{QueueStats, Status, Task, TaskId};

use super::TaskScheduler;

impl TaskScheduler {
    /// Snapshot of one task
    pub async fn get_task(&self, id: &TaskId) -> Result<Task> {
        let table = self.table.lock().await;
        table
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound { id: id.clone() }.into())
    }

    /// Every task, oldest first
    pub async fn list_tasks(&self) -> Vec<Task> {
        let table = self.table.lock().await;
        table.ordered().into_iter().cloned().collect()
    }

    /// Tasks in `status`, oldest first
    pub async fn tasks_by_status(&self, status: Status) -> Vec<Task> {
        let table = self.table.lock().await;
        table
            .ordered()
            .into_iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    /// Count of tasks per status plus the admission bound
    pub async fn queue_stats(&self) -> QueueStats {
        let table = self.table.lock().await;
        let mut stats = QueueStats {
            total: table.tasks.len(),
            max_concurrent: table.max_concurrent,
            ..Default::default()
        };

        for task in table.tasks.values() {
            match task.status {
                Status::Pending => stats.pending += 1,
                Status::Active => stats.active += 1,
                Status::Paused => stats.paused += 1,
                Status::Completed => stats.completed += 1,
                Status::Failed => stats.failed += 1,
                Status::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Whether every task has reached Completed, Failed or Cancelled
    pub async fn all_finished(&self) -> bool {
        let table = self.table.lock().await;
        table.tasks.values().all(|t| t.status.is_terminal())
    }
}
