use super::*;
use crate::error::TaskError;
use crate::test_helpers::{
    MockFetcher, MockMuxer, MockResolver, Mocks, create_test_scheduler, test_config,
};
use crate::types::{Status, TaskAction, TaskOptions};
use std::time::Duration;

mod lifecycle;

const PAGE: &str = "https://host/video/BV1demo?p=1";

/// Poll until `id` reaches `status`, failing after five seconds
async fn wait_for_status(scheduler: &TaskScheduler, id: &TaskId, status: Status) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = scheduler.get_task(id).await.unwrap();
        if task.status == status {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {} stuck in {} waiting for {}",
            id,
            task.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `check` holds, failing after five seconds
async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Drain events already delivered to `rx`
fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Status sequence of `id` as announced on the event bus, starting at Pending
fn status_walk(events: &[Event], id: &TaskId) -> Vec<Status> {
    let mut walk = Vec::new();
    for event in events {
        match event {
            Event::Added { id: added, .. } if added == id => walk.push(Status::Pending),
            Event::StatusChanged {
                id: changed,
                status,
                ..
            } if changed == id => walk.push(*status),
            _ => {}
        }
    }
    walk
}

fn assert_valid_walk(walk: &[Status]) {
    for pair in walk.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "invalid transition {} -> {} in {:?}",
            pair[0],
            pair[1],
            walk
        );
    }
}
