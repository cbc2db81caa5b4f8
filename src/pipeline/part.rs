//! Fetch, mux and placement for one part of a task

use super::progress::{PartSlot, StepWeights};
use super::{Components, PipelineReport, ReportSink};
use crate::config::FileCollisionAction;
use crate::fetcher::{FetchOutcome, FetchProgress};
use crate::muxer::MuxOutcome;
use crate::resolver::VideoInfo;
use crate::types::{StreamKind, StreamSelection, TaskId};
use crate::utils::get_unique_path;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Non-failure result of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PartResult {
    /// Output written
    Done,
    /// Output from an earlier run already exists
    AlreadyPresent,
    /// Cancellation requested; temp files kept
    Cancelled,
}

pub(super) struct PartJob<'a> {
    pub task_id: &'a TaskId,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Output file name without extension
    pub base_name: String,
    pub selection: StreamSelection,
    pub slot: PartSlot,
    pub collision: FileCollisionAction,
    /// Treat an existing output as already downloaded (series resume)
    pub skip_existing: bool,
}

impl PartJob<'_> {
    /// Download `info` and put the result in `output_dir`
    ///
    /// Errors are task-level messages. A mux failure still moves both
    /// elementary files next to where the muxed output would have gone.
    pub(super) async fn run(
        &self,
        components: &Components,
        info: &VideoInfo,
        sink: &dyn ReportSink,
        cancel: &CancellationToken,
    ) -> Result<PartResult, String> {
        let selection = self.effective_selection(info, sink)?;
        let desired = self
            .output_dir
            .join(format!("{}.{}", self.base_name, output_extension(selection)));

        if self.skip_existing && desired.is_file() {
            self.report_overall(sink, 100.0, "already downloaded");
            return Ok(PartResult::AlreadyPresent);
        }

        let weights = StepWeights::for_selection(selection);
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| {
                format!(
                    "failed to create temp directory {}: {}",
                    self.temp_dir.display(),
                    e
                )
            })?;

        let video_tmp = self
            .temp_dir
            .join(format!("p{:02}.video.tmp", self.slot.index));
        let audio_tmp = self
            .temp_dir
            .join(format!("p{:02}.audio.tmp", self.slot.index));

        if selection.includes_video() {
            let url = info
                .video_url
                .as_deref()
                .ok_or_else(|| "page has no video stream".to_string())?;
            let fetched = self
                .fetch_stream(components, StreamKind::Video, url, &video_tmp, weights, sink, cancel)
                .await?;
            if !fetched {
                return Ok(PartResult::Cancelled);
            }
        }

        if selection.includes_audio() {
            let url = info
                .audio_url
                .as_deref()
                .ok_or_else(|| "page has no audio stream".to_string())?;
            let fetched = self
                .fetch_stream(components, StreamKind::Audio, url, &audio_tmp, weights, sink, cancel)
                .await?;
            if !fetched {
                return Ok(PartResult::Cancelled);
            }
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| {
                format!(
                    "failed to create destination directory {}: {}",
                    self.output_dir.display(),
                    e
                )
            })?;

        match selection {
            StreamSelection::Full => {
                self.mux(components, &video_tmp, &audio_tmp, &desired, weights, sink, cancel)
                    .await
            }
            StreamSelection::VideoOnly => self.place(&video_tmp, &desired, sink).await,
            StreamSelection::AudioOnly => self.place(&audio_tmp, &desired, sink).await,
        }
    }

    /// Selection narrowed to what the page actually offers
    fn effective_selection(
        &self,
        info: &VideoInfo,
        sink: &dyn ReportSink,
    ) -> Result<StreamSelection, String> {
        let has_video = info.video_url.is_some();
        let has_audio = info.audio_url.is_some();

        match (self.selection, has_video, has_audio) {
            (StreamSelection::Full, true, true) => Ok(StreamSelection::Full),
            (StreamSelection::Full, true, false) => {
                sink.log("page has no audio stream, saving video only".to_string());
                Ok(StreamSelection::VideoOnly)
            }
            (StreamSelection::Full, false, true) => {
                sink.log("page has no video stream, saving audio only".to_string());
                Ok(StreamSelection::AudioOnly)
            }
            (StreamSelection::VideoOnly, true, _) => Ok(StreamSelection::VideoOnly),
            (StreamSelection::AudioOnly, _, true) => Ok(StreamSelection::AudioOnly),
            (StreamSelection::VideoOnly, false, _) => Err("page has no video stream".to_string()),
            (StreamSelection::AudioOnly, _, false) => Err("page has no audio stream".to_string()),
            (StreamSelection::Full, false, false) => Err("page has no streams".to_string()),
        }
    }

    /// Returns false when the fetch was cancelled
    #[allow(clippy::too_many_arguments)]
    async fn fetch_stream(
        &self,
        components: &Components,
        kind: StreamKind,
        url: &str,
        dest: &Path,
        weights: StepWeights,
        sink: &dyn ReportSink,
        cancel: &CancellationToken,
    ) -> Result<bool, String> {
        let step = match kind {
            StreamKind::Video => "downloading video",
            StreamKind::Audio => "downloading audio",
            StreamKind::Merge => "merging",
        };

        let on_progress = |p: FetchProgress| {
            if let Some(percent) = p.percent() {
                self.report_step(sink, kind, percent, weights, step);
            }
        };

        match components.fetcher.fetch(url, dest, &on_progress, cancel).await {
            Ok(FetchOutcome::Completed { bytes, .. }) => {
                self.report_step(sink, kind, 100.0, weights, step);
                tracing::debug!(task_id = %self.task_id, ?kind, bytes, "stream fetched");
                Ok(true)
            }
            Ok(FetchOutcome::Cancelled { .. }) => Ok(false),
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, ?kind, error = %e, "stream fetch failed");
                Err(format!("{} stream: {}", kind_name(kind), e))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn mux(
        &self,
        components: &Components,
        video_tmp: &Path,
        audio_tmp: &Path,
        desired: &Path,
        weights: StepWeights,
        sink: &dyn ReportSink,
        cancel: &CancellationToken,
    ) -> Result<PartResult, String> {
        let output = get_unique_path(desired, self.collision).map_err(|e| e.to_string())?;
        self.report_step(sink, StreamKind::Merge, 0.0, weights, "merging");

        match components
            .muxer
            .mux(video_tmp, audio_tmp, &output, cancel)
            .await
        {
            Ok(MuxOutcome::Merged(path)) => {
                for temp in [video_tmp, audio_tmp] {
                    if let Err(e) = tokio::fs::remove_file(temp).await {
                        tracing::warn!(path = %temp.display(), error = %e, "failed to remove temp file");
                    }
                }
                self.report_step(sink, StreamKind::Merge, 100.0, weights, "merged");
                sink.log(format!("saved {}", path.display()));
                Ok(PartResult::Done)
            }
            Ok(MuxOutcome::Cancelled) => Ok(PartResult::Cancelled),
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, muxer = components.muxer.name(), error = %e, "mux failed, keeping elementary streams");
                let video = self
                    .keep(video_tmp, &format!("{}_video.mp4", self.base_name))
                    .await?;
                let audio = self
                    .keep(audio_tmp, &format!("{}_audio.m4a", self.base_name))
                    .await?;
                sink.log(format!(
                    "mux failed, kept {} and {}",
                    video.display(),
                    audio.display()
                ));
                Err(format!(
                    "mux failed: {}; kept elementary streams {} and {}",
                    e,
                    video.display(),
                    audio.display()
                ))
            }
        }
    }

    /// Move a single-stream temp file to its final name
    async fn place(
        &self,
        temp: &Path,
        desired: &Path,
        sink: &dyn ReportSink,
    ) -> Result<PartResult, String> {
        let output = get_unique_path(desired, self.collision).map_err(|e| e.to_string())?;
        move_file(temp, &output).await.map_err(|e| {
            format!(
                "failed to move {} to {}: {}",
                temp.display(),
                output.display(),
                e
            )
        })?;
        self.report_overall(sink, 100.0, "saved");
        sink.log(format!("saved {}", output.display()));
        Ok(PartResult::Done)
    }

    /// Fallback placement; never overwrites an existing file
    async fn keep(&self, temp: &Path, name: &str) -> Result<PathBuf, String> {
        let target = get_unique_path(&self.output_dir.join(name), FileCollisionAction::Rename)
            .map_err(|e| e.to_string())?;
        move_file(temp, &target).await.map_err(|e| {
            format!(
                "mux failed and {} could not be kept: {}",
                temp.display(),
                e
            )
        })?;
        Ok(target)
    }

    fn report_step(
        &self,
        sink: &dyn ReportSink,
        kind: StreamKind,
        percent: f32,
        weights: StepWeights,
        step: &str,
    ) {
        sink.report(PipelineReport::StreamProgress {
            stream: kind,
            percent,
        });
        self.report_overall(sink, weights.part_percent(kind, percent), step);
    }

    fn report_overall(&self, sink: &dyn ReportSink, part_percent: f32, step: &str) {
        sink.report(PipelineReport::Progress {
            percent: self.slot.overall(part_percent),
            message: format!("{}{}", self.slot.label(), step),
        });
    }
}

fn output_extension(selection: StreamSelection) -> &'static str {
    match selection {
        StreamSelection::Full | StreamSelection::VideoOnly => "mp4",
        StreamSelection::AudioOnly => "m4a",
    }
}

fn kind_name(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Video => "video",
        StreamKind::Audio => "audio",
        StreamKind::Merge => "merge",
    }
}

/// Rename, falling back to copy + delete across filesystems
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(from = %from.display(), to = %to.display(), error = %rename_err, "rename failed, copying");
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}
