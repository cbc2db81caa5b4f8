//! Shared test helpers: mock resolver, fetcher and muxer, plus config and scheduler builders.

use crate::config::Config;
use crate::error::{FetchError, MuxError, ResolveError};
use crate::fetcher::{FetchOutcome, FetchProgress, ProgressCallback, StreamFetcher};
use crate::muxer::{MuxOutcome, Muxer};
use crate::pipeline::{Components, PipelineReport, ReportSink};
use crate::resolver::{PageResolver, VideoInfo, normalize_url};
use crate::scheduler::TaskScheduler;
use crate::store::MemoryTaskStore;
use crate::utils::file_len;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Config rooted in `dir` with no politeness delays
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.join("downloads");
    config.download.temp_dir = dir.join("temp");
    config.download.max_concurrent_downloads = 3;
    config.resolver.part_delay_min = Duration::ZERO;
    config.resolver.part_delay_max = Duration::ZERO;
    config.resolver.max_probe_parts = 10;
    config.persistence.tasks_file = dir.join("data/tasks.json");
    config
}

/// Resolver serving a fixed page, optionally as a multi-part series
pub(crate) struct MockResolver {
    title: String,
    has_video: bool,
    has_audio: bool,
    available_parts: u32,
    marker: bool,
    failing_parts: HashSet<u32>,
    fail_all: bool,
    calls: Mutex<Vec<String>>,
}

impl MockResolver {
    pub(crate) fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            has_video: true,
            has_audio: true,
            available_parts: 1,
            marker: false,
            failing_parts: HashSet::new(),
            fail_all: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn video_only(mut self) -> Self {
        self.has_audio = false;
        self
    }

    /// Series of `parts` parts; `marker` makes part 1 advertise the count
    pub(crate) fn with_parts(mut self, parts: u32, marker: bool) -> Self {
        self.available_parts = parts;
        self.marker = marker;
        self
    }

    pub(crate) fn failing_part(mut self, part: u32) -> Self {
        self.failing_parts.insert(part);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageResolver for MockResolver {
    async fn resolve(&self, url: &str) -> Result<VideoInfo, ResolveError> {
        self.calls.lock().unwrap().push(url.to_string());
        let (_, part) = normalize_url(url)?;

        if self.fail_all || self.failing_parts.contains(&part) {
            return Err(ResolveError::MissingPlayInfo);
        }
        if part > self.available_parts {
            return Err(ResolveError::HttpStatus {
                url: url.to_string(),
                status: 404,
            });
        }

        let title = if self.available_parts > 1 {
            format!("{} Part {}", self.title, part)
        } else {
            self.title.clone()
        };

        Ok(VideoInfo {
            title,
            video_url: self.has_video.then(|| format!("mock://{}/p{}/video", url_key(url), part)),
            audio_url: self.has_audio.then(|| format!("mock://{}/p{}/audio", url_key(url), part)),
            part_index: part,
            part_count: self.marker.then_some(self.available_parts),
        })
    }
}

fn url_key(url: &str) -> String {
    url.split('?')
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or("page")
        .to_string()
}

/// Fetcher writing a deterministic body, with an optional gate that holds
/// every fetch halfway until opened
pub(crate) struct MockFetcher {
    size: usize,
    failing: HashSet<String>,
    gate: tokio::sync::watch::Sender<bool>,
    calls: Mutex<Vec<(String, u64)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        let (gate, _) = tokio::sync::watch::channel(true);
        Self {
            size: 1000,
            failing: HashSet::new(),
            gate,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fetches stop halfway until [`open_gate`](Self::open_gate)
    pub(crate) fn gated() -> Self {
        let fetcher = Self::new();
        fetcher.gate.send_replace(false);
        fetcher
    }

    /// Fetches of URLs containing `needle` fail with a non-retryable error
    pub(crate) fn failing_on(mut self, needle: &str) -> Self {
        self.failing.insert(needle.to_string());
        self
    }

    pub(crate) fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub(crate) fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn body(&self) -> Vec<u8> {
        (0..self.size).map(|i| (i % 251) as u8).collect()
    }

    /// `(url, resume offset)` of every call
    pub(crate) fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamFetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let offset = file_len(dest).await.unwrap();
        self.calls.lock().unwrap().push((url.to_string(), offset));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if self.failing.iter().any(|needle| url.contains(needle.as_str())) {
            return Err(FetchError::HttpStatus { status: 403 });
        }

        let body = self.body();
        let total = body.len() as u64;
        let half = (body.len() / 2) as u64;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)
            .await
            .unwrap();

        let mut written = offset;
        if written < half {
            file.write_all(&body[written as usize..half as usize])
                .await
                .unwrap();
            file.flush().await.unwrap();
            written = half;
        }
        on_progress(FetchProgress {
            downloaded: written,
            total: Some(total),
        });

        let mut gate = self.gate.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(FetchOutcome::Cancelled { bytes: written }),
            _ = gate.wait_for(|open| *open) => {}
        }

        if written < total {
            file.write_all(&body[written as usize..]).await.unwrap();
            file.flush().await.unwrap();
        }
        on_progress(FetchProgress {
            downloaded: total,
            total: Some(total),
        });
        Ok(FetchOutcome::Completed {
            bytes: total,
            total: Some(total),
        })
    }
}

/// Muxer that concatenates its inputs, or fails like a broken ffmpeg
pub(crate) struct MockMuxer {
    fail: bool,
    calls: AtomicUsize,
}

impl MockMuxer {
    pub(crate) fn succeeding() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Muxer for MockMuxer {
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<MuxOutcome, MuxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MuxError::Execution {
                exit_code: Some(1),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }
        let mut merged = tokio::fs::read(video).await.unwrap();
        merged.extend(tokio::fs::read(audio).await.unwrap());
        tokio::fs::write(output, merged).await.unwrap();
        Ok(MuxOutcome::Merged(output.to_path_buf()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Mocks bundled as pipeline components, keeping handles for assertions
pub(crate) struct Mocks {
    pub resolver: Arc<MockResolver>,
    pub fetcher: Arc<MockFetcher>,
    pub muxer: Arc<MockMuxer>,
}

impl Mocks {
    pub(crate) fn new(resolver: MockResolver, fetcher: MockFetcher, muxer: MockMuxer) -> Self {
        Self {
            resolver: Arc::new(resolver),
            fetcher: Arc::new(fetcher),
            muxer: Arc::new(muxer),
        }
    }

    /// "Demo" page, immediate fetches, succeeding muxer
    pub(crate) fn happy() -> Self {
        Self::new(
            MockResolver::new("Demo"),
            MockFetcher::new(),
            MockMuxer::succeeding(),
        )
    }

    pub(crate) fn components(&self) -> Components {
        Components {
            resolver: self.resolver.clone(),
            fetcher: self.fetcher.clone(),
            muxer: self.muxer.clone(),
        }
    }
}

/// Sink that keeps every report
#[derive(Default)]
pub(crate) struct RecordingSink {
    reports: Mutex<Vec<PipelineReport>>,
}

impl RecordingSink {
    pub(crate) fn reports(&self) -> Vec<PipelineReport> {
        self.reports.lock().unwrap().clone()
    }

    pub(crate) fn overall(&self) -> Vec<f32> {
        self.reports()
            .into_iter()
            .filter_map(|r| match r {
                PipelineReport::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn titles(&self) -> Vec<String> {
        self.reports()
            .into_iter()
            .filter_map(|r| match r {
                PipelineReport::TitleResolved { title } => Some(title),
                _ => None,
            })
            .collect()
    }
}

impl ReportSink for RecordingSink {
    fn report(&self, report: PipelineReport) {
        self.reports.lock().unwrap().push(report);
    }
}

/// Scheduler over `mocks` with an in-memory store
pub(crate) async fn create_test_scheduler(
    mocks: &Mocks,
    max_concurrent: usize,
) -> (TaskScheduler, Arc<MemoryTaskStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.download.max_concurrent_downloads = max_concurrent;
    let store = Arc::new(MemoryTaskStore::new());

    let scheduler = TaskScheduler::with_components(config, mocks.components(), store.clone())
        .await
        .unwrap();

    (scheduler, store, dir)
}
