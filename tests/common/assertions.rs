//! Waiting helpers for end-to-end tests

use dash_dl::{Status, Task, TaskId, TaskScheduler};
use std::time::Duration;

/// Poll until the task reaches a terminal status, panicking after `timeout`
pub async fn wait_for_terminal(scheduler: &TaskScheduler, id: &TaskId, timeout: Duration) -> Task {
    let result = tokio::time::timeout(timeout, async {
        loop {
            let task = scheduler.get_task(id).await.unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    match result {
        Ok(task) => task,
        Err(_) => {
            let task = scheduler.get_task(id).await.unwrap();
            panic!(
                "task {} still {} after {:?} ({:.1}%)",
                id, task.status, timeout, task.overall_progress
            );
        }
    }
}

/// Assert the terminal status and return the task
pub async fn expect_status(
    scheduler: &TaskScheduler,
    id: &TaskId,
    status: Status,
) -> Task {
    let task = wait_for_terminal(scheduler, id, Duration::from_secs(20)).await;
    assert_eq!(
        task.status, status,
        "task {} ended {} (error: {:?})",
        id, task.status, task.last_error
    );
    task
}
