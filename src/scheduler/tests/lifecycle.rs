use super::*;
use crate::store::MemoryTaskStore;
use crate::types::StreamSelection;
use chrono::Utc;

fn stored_task(id: &str, status: Status, age_secs: i64) -> Task {
    let created = Utc::now() - chrono::Duration::seconds(age_secs);
    Task {
        id: TaskId::new(id),
        source_url: PAGE.to_string(),
        title: String::new(),
        destination_dir: std::path::PathBuf::from("unused"),
        stream_selection: StreamSelection::Full,
        status,
        overall_progress: if status == Status::Completed { 100.0 } else { 40.0 },
        stream_progress: Default::default(),
        created_at: created,
        updated_at: created,
        last_error: String::new(),
        series: false,
    }
}

#[tokio::test]
async fn test_restore_marks_interrupted_tasks_paused() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.download.max_concurrent_downloads = 1;

    let mut pending = stored_task("task_20240101000000_0003", Status::Pending, 10);
    pending.destination_dir = dir.path().join("downloads");
    let store = Arc::new(MemoryTaskStore::with_tasks(vec![
        stored_task("task_20240101000000_0001", Status::Active, 30),
        stored_task("task_20240101000000_0002", Status::Completed, 20),
        pending,
    ]));

    let mocks = Mocks::new(
        MockResolver::new("Demo"),
        MockFetcher::gated(),
        MockMuxer::succeeding(),
    );
    let scheduler = TaskScheduler::with_components(config, mocks.components(), store.clone())
        .await
        .unwrap();

    let interrupted = scheduler
        .get_task(&TaskId::new("task_20240101000000_0001"))
        .await
        .unwrap();
    assert_eq!(interrupted.status, Status::Paused);
    assert_eq!(interrupted.overall_progress, 40.0);

    let pending = TaskId::new("task_20240101000000_0003");
    assert_eq!(
        scheduler.get_task(&pending).await.unwrap().status,
        Status::Active,
        "restored pending task is admitted"
    );

    let persisted = store.snapshot();
    assert_eq!(persisted.len(), 3);
    assert_eq!(
        persisted
            .iter()
            .find(|t| t.id.as_str() == "task_20240101000000_0001")
            .unwrap()
            .status,
        Status::Paused
    );

    mocks.fetcher.open_gate();
    wait_for_status(&scheduler, &pending, Status::Completed).await;
}

#[tokio::test]
async fn test_submitted_ids_are_unique() {
    let mocks = Mocks::happy();
    let (scheduler, _store, _dir) = create_test_scheduler(&mocks, 1).await;

    let mut ids = std::collections::HashSet::new();
    for _ in 0..20 {
        let id = scheduler.submit(PAGE, TaskOptions::default()).await.unwrap();
        assert!(id.as_str().starts_with("task_"));
        assert!(ids.insert(id), "duplicate task id");
    }
}

#[tokio::test]
async fn test_shutdown_pauses_running_tasks() {
    let mocks = Mocks::new(
        MockResolver::new("Demo"),
        MockFetcher::gated(),
        MockMuxer::succeeding(),
    );
    let (scheduler, store, _dir) = create_test_scheduler(&mocks, 2).await;
    let mut events = scheduler.subscribe();

    let a = scheduler.submit(PAGE, TaskOptions::default()).await.unwrap();
    let b = scheduler.submit(PAGE, TaskOptions::default()).await.unwrap();
    let queued = scheduler.submit(PAGE, TaskOptions::default()).await.unwrap();
    let fetcher = mocks.fetcher.clone();
    wait_until("both fetches in flight", || fetcher.in_flight() == 2).await;

    scheduler.shutdown().await.unwrap();

    assert!(scheduler.is_shutting_down());
    for id in [&a, &b] {
        assert_eq!(scheduler.get_task(id).await.unwrap().status, Status::Paused);
    }
    assert_eq!(
        scheduler.get_task(&queued).await.unwrap().status,
        Status::Pending,
        "nothing is admitted during shutdown"
    );
    assert!(
        store
            .snapshot()
            .iter()
            .all(|t| t.status != Status::Active)
    );
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, Event::Shutdown))
    );

    let err = scheduler
        .submit(PAGE, TaskOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}

#[tokio::test]
async fn test_json_store_round_trip_through_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let tasks_file = config.persistence.tasks_file.clone();

    let mocks = Mocks::happy();
    let store = Arc::new(JsonTaskStore::new(tasks_file.clone()));
    let scheduler = TaskScheduler::with_components(config.clone(), mocks.components(), store)
        .await
        .unwrap();
    let id = scheduler
        .submit(
            PAGE,
            TaskOptions {
                title: Some("Lecture".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // Outcomes are persisted before the table lock is released
    wait_for_status(&scheduler, &id, Status::Completed).await;

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&tasks_file).unwrap()).unwrap();
    let entry = &raw[id.as_str()];
    assert_eq!(entry["title"], "Lecture");
    assert_eq!(entry["status"], "completed");
    assert_eq!(entry["url"], PAGE);

    let reopened = TaskScheduler::with_components(
        config,
        Mocks::happy().components(),
        Arc::new(JsonTaskStore::new(tasks_file)),
    )
    .await
    .unwrap();
    let restored = reopened.get_task(&id).await.unwrap();
    assert_eq!(restored.status, Status::Completed);
    assert!(dir.path().join("downloads/Lecture.mp4").is_file());
}
