//! Persisted task store
//!
//! The scheduler writes a full snapshot of its task table after every
//! state-affecting mutation. [`JsonTaskStore`] keeps that snapshot as a single
//! JSON object keyed by task id, replaced atomically via write-then-rename.
//! [`MemoryTaskStore`] keeps it in memory for tests and embedders that do not
//! want a file.

use crate::error::{Error, Result};
use crate::types::Task;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Snapshot storage for task descriptions
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Load every persisted task, oldest first
    async fn load(&self) -> Result<Vec<Task>>;

    /// Replace the persisted snapshot with `tasks`
    async fn save(&self, tasks: &[Task]) -> Result<()>;
}

/// JSON file store (`{ "<task id>": { ...task... }, ... }`)
#[derive(Clone, Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
}

impl JsonTaskStore {
    /// Store backed by the file at `path` (created on first save)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tasks.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn load(&self) -> Result<Vec<Task>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no task store yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Store(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let map: BTreeMap<String, Task> = serde_json::from_str(&raw).map_err(|e| {
            Error::Store(format!("failed to parse {}: {}", self.path.display(), e))
        })?;

        let mut tasks: Vec<Task> = map.into_values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        tracing::debug!(path = %self.path.display(), count = tasks.len(), "loaded task store");
        Ok(tasks)
    }

    async fn save(&self, tasks: &[Task]) -> Result<()> {
        let map: BTreeMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let json = serde_json::to_string_pretty(&map)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Store(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, json.as_bytes())
            .await
            .map_err(|e| Error::Store(format!("failed to write {}: {}", temp.display(), e)))?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            Error::Store(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    saves: Mutex<usize>,
}

impl MemoryTaskStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `tasks`, as if left over from a previous run
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            saves: Mutex::new(0),
        }
    }

    /// Last saved snapshot
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks
            .lock()
            .map(|tasks| tasks.clone())
            .unwrap_or_default()
    }

    /// Number of times `save` was called
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or_default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn load(&self) -> Result<Vec<Task>> {
        Ok(self.snapshot())
    }

    async fn save(&self, tasks: &[Task]) -> Result<()> {
        let mut guard = self
            .tasks
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))?;
        *guard = tasks.to_vec();
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Status, StreamProgress, StreamSelection, TaskId};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn task(id: &str, age_secs: i64) -> Task {
        let created = Utc::now() - Duration::seconds(age_secs);
        Task {
            id: TaskId::new(id),
            source_url: format!("https://host/video/{id}"),
            title: format!("Title {id}"),
            destination_dir: PathBuf::from("/downloads"),
            stream_selection: StreamSelection::Full,
            status: Status::Pending,
            overall_progress: 0.0,
            stream_progress: StreamProgress::default(),
            created_at: created,
            updated_at: created,
            last_error: String::new(),
            series: false,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonTaskStore::new(dir.path().join("nested/tasks.json"));

        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_returns_tasks_oldest_first() {
        let dir = TempDir::new().unwrap();
        let store = JsonTaskStore::new(dir.path().join("data/tasks.json"));

        let mut newer = task("task_b", 10);
        newer.status = Status::Failed;
        newer.last_error = "boom".into();
        let older = task("task_z", 100);

        store.save(&[newer.clone(), older.clone()]).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, older.id);
        assert_eq!(loaded[1].id, newer.id);
        assert_eq!(loaded[1].status, Status::Failed);
        assert_eq!(loaded[1].last_error, "boom");
        assert!(!store.temp_path().exists(), "temp file must be renamed away");
    }

    #[tokio::test]
    async fn snapshot_is_object_keyed_by_id() {
        let dir = TempDir::new().unwrap();
        let store = JsonTaskStore::new(dir.path().join("tasks.json"));
        store.save(&[task("task_1", 0)]).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        let record = &value["task_1"];
        for key in [
            "id",
            "url",
            "title",
            "save_path",
            "download_type",
            "status",
            "progress",
            "created_at",
            "updated_at",
            "error",
        ] {
            assert!(record.get(key).is_some(), "missing key {key}");
        }
    }

    #[tokio::test]
    async fn save_replaces_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = JsonTaskStore::new(dir.path().join("tasks.json"));

        store.save(&[task("task_1", 0), task("task_2", 0)]).await.unwrap();
        store.save(&[task("task_2", 0)]).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id.as_str(), "task_2");
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonTaskStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryTaskStore::new();
        store.save(&[task("task_1", 0)]).await.unwrap();
        store.save(&[]).await.unwrap();

        assert_eq!(store.save_count(), 2);
        assert!(store.load().await.unwrap().is_empty());
    }
}
