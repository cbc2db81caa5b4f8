//! Task submission and id allocation.

use crate::error::{Error, Result};
use crate::resolver::normalize_url;
use crate::types::{Event, Status, StreamProgress, Task, TaskId, TaskOptions};
use chrono::Utc;
use std::sync::atomic::Ordering;

use super::{TaskScheduler, TaskTable};

impl TaskScheduler {
    /// Submit a page URL for download
    ///
    /// The task starts Pending and is promoted to Active straight away when a
    /// slot is free. Without a title the task is shown by its URL until the
    /// page title is resolved. The destination defaults to the configured
    /// download directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The scheduler is shutting down
    /// - The URL cannot be parsed
    /// - The task store cannot be written
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use dash_dl::*;
    /// # async fn example(scheduler: TaskScheduler) -> Result<()> {
    /// let id = scheduler
    ///     .submit(
    ///         "https://www.bilibili.com/video/BV1xx411c7mD?p=1",
    ///         TaskOptions {
    ///             stream_selection: StreamSelection::AudioOnly,
    ///             ..Default::default()
    ///         },
    ///     )
    ///     .await?;
    /// println!("queued {}", id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(&self, url: &str, options: TaskOptions) -> Result<TaskId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let url = url.trim();
        normalize_url(url)?;

        let mut table = self.table.lock().await;
        let id = self.allocate_id(&table);
        let now = Utc::now();

        let task = Task {
            id: id.clone(),
            source_url: url.to_string(),
            title: options
                .title
                .map(|t| t.trim().to_string())
                .unwrap_or_default(),
            destination_dir: options
                .destination_dir
                .unwrap_or_else(|| self.config.download.download_dir.clone()),
            stream_selection: options.stream_selection,
            status: Status::Pending,
            overall_progress: 0.0,
            stream_progress: StreamProgress::default(),
            created_at: now,
            updated_at: now,
            last_error: String::new(),
            series: options.series,
        };

        tracing::info!(
            task_id = %id,
            url = %task.source_url,
            selection = ?task.stream_selection,
            series = task.series,
            "task submitted"
        );
        self.emit_event(Event::Added {
            id: id.clone(),
            title: task.display_title().to_string(),
        });
        table.tasks.insert(id.clone(), task);

        self.admit_pending(&mut table);
        self.persist(&table).await?;

        Ok(id)
    }

    /// `task_<timestamp>_<seq>`, unique within the table
    fn allocate_id(&self, table: &TaskTable) -> TaskId {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let id = TaskId::new(format!("task_{}_{:04}", stamp, seq));
            if !table.tasks.contains_key(&id) {
                return id;
            }
        }
    }
}
