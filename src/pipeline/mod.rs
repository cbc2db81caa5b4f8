//! Per-task download pipeline
//!
//! [`DownloadPipeline::run`] takes one task from its page URL to files in the
//! destination directory: resolve (or expand a series), fetch the selected
//! elementary streams into the task's temp namespace, then mux or move them
//! into place. Every failure is folded into a single human-readable message
//! carried by [`TerminalOutcome::Failed`]; cancellation is its own outcome.
//!
//! The pipeline never touches the task table. Progress, title and log updates
//! leave through the [`ReportSink`] it is handed.

mod part;
mod progress;

use crate::config::{Config, FileCollisionAction};
use crate::error::Result;
use crate::fetcher::{HttpStreamFetcher, StreamFetcher};
use crate::muxer::{FfmpegMuxer, Muxer};
use crate::resolver::{HttpPageResolver, PageResolver, SeriesExpander};
use crate::types::{StreamKind, StreamSelection, Task, TaskId};
use crate::utils::{clean_series_title, sanitize_filename};
use part::{PartJob, PartResult};
use progress::PartSlot;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// Every requested output is in place
    Completed,
    /// The run stopped on a fatal error, or some series parts failed
    Failed(String),
    /// Stopped by the cancellation token; partial stream files are kept
    Cancelled,
}

/// Update emitted by a running pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineReport {
    /// Overall task progress (0.0 to 100.0)
    Progress {
        /// Percentage
        percent: f32,
        /// What is happening
        message: String,
    },
    /// Progress of one step of the current part
    StreamProgress {
        /// Step
        stream: StreamKind,
        /// Percentage
        percent: f32,
    },
    /// The page (or series) title is known
    TitleResolved {
        /// Display title
        title: String,
    },
    /// Log line for collaborators
    Log {
        /// Text
        text: String,
    },
}

/// Receives [`PipelineReport`]s for one task
pub trait ReportSink: Send + Sync {
    /// Deliver one report; must not block
    fn report(&self, report: PipelineReport);

    /// Shorthand for [`PipelineReport::Log`]
    fn log(&self, text: String) {
        self.report(PipelineReport::Log { text });
    }
}

/// Snapshot of the task fields the pipeline needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineJob {
    /// Task id, also the temp namespace
    pub id: TaskId,
    /// Page URL (first part for a series)
    pub url: String,
    /// Title override; None means use the resolved title
    pub title: Option<String>,
    /// Destination directory
    pub destination_dir: PathBuf,
    /// Which streams to fetch
    pub selection: StreamSelection,
    /// Download every part of the series
    pub series: bool,
}

impl PipelineJob {
    /// Job for `task` as it currently stands
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            url: task.source_url.clone(),
            title: (!task.title.is_empty()).then(|| task.title.clone()),
            destination_dir: task.destination_dir.clone(),
            selection: task.stream_selection,
            series: task.series,
        }
    }
}

/// Resolver, fetcher and muxer a pipeline runs with
#[derive(Clone)]
pub struct Components {
    /// Page resolver
    pub resolver: Arc<dyn PageResolver>,
    /// Stream fetcher
    pub fetcher: Arc<dyn StreamFetcher>,
    /// External muxer
    pub muxer: Arc<dyn Muxer>,
}

impl Components {
    /// HTTP resolver and fetcher sharing one client, plus the configured ffmpeg
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = crate::http::build_client(config)?;
        Ok(Self {
            resolver: Arc::new(HttpPageResolver::new(client.clone())),
            fetcher: Arc::new(HttpStreamFetcher::new(client, &config.fetch)),
            muxer: Arc::new(FfmpegMuxer::from_config(&config.tools)),
        })
    }
}

/// Runs one task's resolve → fetch → mux sequence
pub struct DownloadPipeline {
    components: Components,
    expander: SeriesExpander,
    temp_root: PathBuf,
    collision: FileCollisionAction,
}

impl DownloadPipeline {
    /// Pipeline using `components`, with temp root, collision policy and
    /// series probing settings from `config`
    pub fn new(components: Components, config: &Config) -> Self {
        let expander = SeriesExpander::new(components.resolver.clone(), &config.resolver);
        Self {
            components,
            expander,
            temp_root: config.download.temp_dir.clone(),
            collision: config.download.file_collision,
        }
    }

    /// Temp namespace of task `id`
    pub fn temp_dir_for(&self, id: &TaskId) -> PathBuf {
        self.temp_root.join(id.as_str())
    }

    /// Run `job` to a terminal outcome
    ///
    /// Temp files are removed on completion and failure and kept on
    /// cancellation so a later run resumes from them.
    pub async fn run(
        &self,
        job: &PipelineJob,
        sink: &dyn ReportSink,
        cancel: &CancellationToken,
    ) -> TerminalOutcome {
        if cancel.is_cancelled() {
            return TerminalOutcome::Cancelled;
        }

        let outcome = if job.series {
            self.run_series(job, sink, cancel).await
        } else {
            self.run_single(job, sink, cancel).await
        };

        match &outcome {
            TerminalOutcome::Cancelled => {
                tracing::debug!(task_id = %job.id, "pipeline cancelled, keeping temp files");
            }
            TerminalOutcome::Completed | TerminalOutcome::Failed(_) => {
                self.remove_temp_dir(&job.id).await;
            }
        }
        outcome
    }

    /// Remove the temp namespace of task `id`, if any
    pub async fn remove_temp_dir(&self, id: &TaskId) {
        let dir = self.temp_dir_for(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::debug!(task_id = %id, path = %dir.display(), "temp dir removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(task_id = %id, path = %dir.display(), error = %e, "failed to remove temp dir")
            }
        }
    }

    async fn run_single(
        &self,
        job: &PipelineJob,
        sink: &dyn ReportSink,
        cancel: &CancellationToken,
    ) -> TerminalOutcome {
        sink.log(format!("resolving {}", job.url));
        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TerminalOutcome::Cancelled,
            resolved = self.components.resolver.resolve(&job.url) => resolved,
        };
        let info = match resolved {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(task_id = %job.id, url = %job.url, error = %e, "resolution failed");
                return TerminalOutcome::Failed(format!("failed to resolve page: {}", e));
            }
        };

        let title = match &job.title {
            Some(title) => title.clone(),
            None => {
                sink.report(PipelineReport::TitleResolved {
                    title: info.title.clone(),
                });
                info.title.clone()
            }
        };
        sink.log(format!("resolved \"{}\"", title));

        let part = PartJob {
            task_id: &job.id,
            temp_dir: self.temp_dir_for(&job.id),
            output_dir: job.destination_dir.clone(),
            base_name: file_base_name(&title, &job.id),
            selection: job.selection,
            slot: PartSlot::SINGLE,
            collision: self.collision,
            skip_existing: false,
        };

        match part.run(&self.components, &info, sink, cancel).await {
            Ok(PartResult::Done) | Ok(PartResult::AlreadyPresent) => {
                sink.log(format!("finished \"{}\"", title));
                TerminalOutcome::Completed
            }
            Ok(PartResult::Cancelled) => TerminalOutcome::Cancelled,
            Err(message) => TerminalOutcome::Failed(message),
        }
    }

    async fn run_series(
        &self,
        job: &PipelineJob,
        sink: &dyn ReportSink,
        cancel: &CancellationToken,
    ) -> TerminalOutcome {
        sink.log(format!("expanding series {}", job.url));
        let expanded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TerminalOutcome::Cancelled,
            expanded = self.expander.expand(&job.url) => expanded,
        };
        let series = match expanded {
            Ok(series) => series,
            Err(e) => {
                tracing::warn!(task_id = %job.id, url = %job.url, error = %e, "series expansion failed");
                return TerminalOutcome::Failed(format!("failed to resolve series: {}", e));
            }
        };

        let series_title = match &job.title {
            Some(title) => title.clone(),
            None => {
                let cleaned = clean_series_title(&series.title);
                sink.report(PipelineReport::TitleResolved {
                    title: cleaned.clone(),
                });
                cleaned
            }
        };
        let folder = file_base_name(&series_title, &job.id);
        let output_dir = job.destination_dir.join(&folder);
        sink.log(format!(
            "series \"{}\" has {} part(s)",
            series_title, series.count
        ));

        let mut failures = Vec::new();
        for (index, url) in series.parts() {
            if index > 1 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TerminalOutcome::Cancelled,
                    _ = self.expander.politeness_delay() => {}
                }
            }

            let slot = PartSlot {
                index,
                count: series.count,
            };
            sink.log(format!("downloading part {}/{}: {}", index, series.count, url));

            let resolved = tokio::select! {
                biased;
                _ = cancel.cancelled() => return TerminalOutcome::Cancelled,
                resolved = self.expander.resolve_part(&series, index) => resolved,
            };
            let info = match resolved {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(task_id = %job.id, part = index, error = %e, "part resolution failed");
                    sink.log(format!("part {} failed: {}", index, e));
                    failures.push(format!("P{:02}: {}", index, e));
                    continue;
                }
            };

            let part = PartJob {
                task_id: &job.id,
                temp_dir: self.temp_dir_for(&job.id),
                output_dir: output_dir.clone(),
                base_name: format!("{}_P{:02}", folder, index),
                selection: job.selection,
                slot,
                collision: self.collision,
                skip_existing: true,
            };

            match part.run(&self.components, &info, sink, cancel).await {
                Ok(PartResult::Done) => sink.log(format!("part {} finished", index)),
                Ok(PartResult::AlreadyPresent) => {
                    sink.log(format!("part {} already downloaded, skipping", index))
                }
                Ok(PartResult::Cancelled) => return TerminalOutcome::Cancelled,
                Err(message) => {
                    sink.log(format!("part {} failed: {}", index, message));
                    failures.push(format!("P{:02}: {}", index, message));
                }
            }
        }

        if failures.is_empty() {
            TerminalOutcome::Completed
        } else {
            TerminalOutcome::Failed(format!(
                "{} of {} parts failed: {}",
                failures.len(),
                series.count,
                failures.join("; ")
            ))
        }
    }
}

/// Sanitized file name for `title`, or the task id when nothing usable remains
fn file_base_name(title: &str, id: &TaskId) -> String {
    let name = sanitize_filename(title);
    if name.is_empty() {
        id.to_string()
    } else {
        name
    }
}
