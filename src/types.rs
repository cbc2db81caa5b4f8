//! Core types for dash-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a task
///
/// Assigned by the scheduler at submission time and never changed afterwards.
/// The textual form (`task_<timestamp>_<sequence>`) is also the key of the
/// persisted task store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// Task status
///
/// ```text
/// Pending ──► Active ──► Completed
///    ▲          │  └───► Failed ─────┐
///    │          └──────► Paused      │
///    ├──────────────────────┘        │
///    └── retry ◄── Failed/Cancelled ◄┘
/// ```
///
/// Any non-terminal state may also move to `Cancelled` or `Failed` on a cancel
/// request. `Completed` never transitions again; only deletion removes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for a worker slot
    Pending,
    /// Bound to a worker and running its pipeline
    Active,
    /// Stopped by the user, partial files kept for a byte-range resume
    Paused,
    /// Pipeline finished and the output is in place
    Completed,
    /// Pipeline failed; `last_error` says why
    Failed,
    /// Stopped by a cancel request; partial files kept
    Cancelled,
}

impl Status {
    /// All statuses, in display order
    pub const ALL: [Status; 6] = [
        Status::Pending,
        Status::Active,
        Status::Paused,
        Status::Completed,
        Status::Failed,
        Status::Cancelled,
    ];

    /// Lowercase name used in the persisted store and in events
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Active => "active",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }

    /// Terminal outcomes: the task does not move again without a user action
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }

    /// Whether `self -> next` is an edge of the task state graph
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Paused)
                | (Active, Cancelled)
                | (Paused, Pending)
                | (Paused, Cancelled)
                | (Paused, Failed)
                | (Failed, Pending)
                | (Cancelled, Pending)
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which elementary streams a task downloads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamSelection {
    /// Video and audio, muxed into one container
    #[default]
    #[serde(rename = "full")]
    Full,
    /// Video track only
    #[serde(rename = "video")]
    VideoOnly,
    /// Audio track only
    #[serde(rename = "audio")]
    AudioOnly,
}

impl StreamSelection {
    /// Whether the video track is fetched
    pub fn includes_video(&self) -> bool {
        matches!(self, StreamSelection::Full | StreamSelection::VideoOnly)
    }

    /// Whether the audio track is fetched
    pub fn includes_audio(&self) -> bool {
        matches!(self, StreamSelection::Full | StreamSelection::AudioOnly)
    }
}

impl std::str::FromStr for StreamSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" | "both" => Ok(StreamSelection::Full),
            "video" | "video-only" => Ok(StreamSelection::VideoOnly),
            "audio" | "audio-only" => Ok(StreamSelection::AudioOnly),
            other => Err(format!(
                "unknown stream selection '{}' (expected full, video or audio)",
                other
            )),
        }
    }
}

/// One of the three sub-steps whose progress is reported separately
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Video stream transfer
    Video,
    /// Audio stream transfer
    Audio,
    /// External mux
    Merge,
}

/// Per-step progress of a task, each 0.0 to 100.0
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamProgress {
    /// Video transfer progress
    pub video: f32,
    /// Audio transfer progress
    pub audio: f32,
    /// Mux progress
    pub merge: f32,
}

impl StreamProgress {
    /// Read one component
    pub fn get(&self, kind: StreamKind) -> f32 {
        match kind {
            StreamKind::Video => self.video,
            StreamKind::Audio => self.audio,
            StreamKind::Merge => self.merge,
        }
    }

    /// Overwrite one component
    pub fn set(&mut self, kind: StreamKind, percent: f32) {
        let slot = match kind {
            StreamKind::Video => &mut self.video,
            StreamKind::Audio => &mut self.audio,
            StreamKind::Merge => &mut self.merge,
        };
        *slot = percent.clamp(0.0, 100.0);
    }
}

/// The durable unit of work owned by the scheduler
///
/// Serialized field names match the persisted task store format
/// (`id, url, title, save_path, download_type, status, progress, created_at,
/// updated_at, error`). Per-stream progress is in-memory only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Scheduler-assigned identifier
    pub id: TaskId,

    /// Content page URL as submitted
    #[serde(rename = "url")]
    pub source_url: String,

    /// Display title; empty until the page title is known
    #[serde(default)]
    pub title: String,

    /// Directory the final output is written to
    #[serde(rename = "save_path")]
    pub destination_dir: PathBuf,

    /// Which streams to fetch
    #[serde(rename = "download_type", default)]
    pub stream_selection: StreamSelection,

    /// Current state
    pub status: Status,

    /// Overall progress 0.0 to 100.0
    #[serde(rename = "progress", default)]
    pub overall_progress: f32,

    /// Per-step progress (not persisted)
    #[serde(skip)]
    pub stream_progress: StreamProgress,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// Last state-affecting mutation
    pub updated_at: DateTime<Utc>,

    /// Reason for the last failure; empty when none
    #[serde(rename = "error", default)]
    pub last_error: String,

    /// Whether the URL is the first part of a multi-part series
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub series: bool,
}

impl Task {
    /// Title for display: the page title once known, otherwise the URL
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.source_url
        } else {
            &self.title
        }
    }

    /// Bump `updated_at`
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Options for submitting a task
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Title override; when absent the resolved page title is used
    #[serde(default)]
    pub title: Option<String>,

    /// Destination directory (None = configured download directory)
    #[serde(default)]
    pub destination_dir: Option<PathBuf>,

    /// Which streams to download
    #[serde(default)]
    pub stream_selection: StreamSelection,

    /// Treat the URL as the first part of a series and download every part
    #[serde(default)]
    pub series: bool,
}

/// User-initiated control action on a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    /// Ask the scheduler to admit a pending task (or resume a paused one)
    Start,
    /// Stop an active task, keeping partial files
    Pause,
    /// Re-queue a paused task
    Resume,
    /// Stop a task for good; partial files are kept
    Cancel,
    /// Reset a failed or cancelled task and re-queue it
    Retry,
    /// Remove the task from the store
    Delete,
}

impl std::str::FromStr for TaskAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(TaskAction::Start),
            "pause" => Ok(TaskAction::Pause),
            "resume" => Ok(TaskAction::Resume),
            "cancel" => Ok(TaskAction::Cancel),
            "retry" => Ok(TaskAction::Retry),
            "delete" | "remove" => Ok(TaskAction::Delete),
            other => Err(format!("unknown task action '{}'", other)),
        }
    }
}

/// Event emitted to collaborators (UI, CLI, loggers)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task submitted
    Added {
        /// Task ID
        id: TaskId,
        /// Title (or URL when the title is not yet known)
        title: String,
    },

    /// Task changed state
    StatusChanged {
        /// Task ID
        id: TaskId,
        /// New status
        status: Status,
        /// Human-readable reason
        message: String,
    },

    /// Overall progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Progress percentage (0.0 to 100.0), non-decreasing while active
        percent: f32,
        /// What the pipeline is doing
        message: String,
    },

    /// Per-step progress update
    StreamProgress {
        /// Task ID
        id: TaskId,
        /// Which step
        stream: StreamKind,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
    },

    /// Task title replaced by the resolved page title
    TitleResolved {
        /// Task ID
        id: TaskId,
        /// New title
        title: String,
    },

    /// Free-form log line
    Log {
        /// Task the line belongs to, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<TaskId>,
        /// Log text
        text: String,
    },

    /// Task deleted
    Removed {
        /// Task ID
        id: TaskId,
    },

    /// Admission bound changed at runtime
    MaxConcurrentChanged {
        /// New bound
        max: usize,
    },

    /// Scheduler shut down
    Shutdown,
}

/// Snapshot of task counts per status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total number of tasks
    pub total: usize,
    /// Tasks waiting for a slot
    pub pending: usize,
    /// Tasks running
    pub active: usize,
    /// Paused tasks
    pub paused: usize,
    /// Completed tasks
    pub completed: usize,
    /// Failed tasks
    pub failed: usize,
    /// Cancelled tasks
    pub cancelled: usize,
    /// Current admission bound
    pub max_concurrent: usize,
}
