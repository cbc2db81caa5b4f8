//! External multiplexer handoff
//!
//! [`FfmpegMuxer`] combines a video-only and an audio-only file into one
//! container by running an external `ffmpeg`-compatible executable:
//!
//! ```text
//! muxer -i <video> -i <audio> -c:v copy -c:a <codec> -strict experimental -y <output>
//! ```
//!
//! Success means exit code 0 **and** an output file on disk. Preconditions
//! (configured executable, executable bit, both inputs) are checked before
//! anything is spawned. Deleting the inputs is left to the caller.

use crate::config::ToolsConfig;
use crate::error::MuxError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Characters of muxer diagnostics kept in [`MuxError::Execution`]
const STDERR_TAIL_CHARS: usize = 2000;

/// Non-error result of a mux attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxOutcome {
    /// Output written
    Merged(PathBuf),
    /// Stopped by the cancellation token; the muxer process was killed
    Cancelled,
}

/// Combines elementary streams into one container
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Mux `video` and `audio` into `output`, replacing any existing file there
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<MuxOutcome, MuxError>;

    /// Name of the muxer implementation
    fn name(&self) -> &'static str;
}

/// [`Muxer`] backed by an external ffmpeg executable
///
/// # Examples
///
/// ```no_run
/// use dash_dl::muxer::{FfmpegMuxer, Muxer};
/// use std::path::{Path, PathBuf};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Explicit path
/// let muxer = FfmpegMuxer::new(PathBuf::from("/usr/bin/ffmpeg"));
///
/// // Or auto-discover from PATH
/// let muxer = FfmpegMuxer::from_path().expect("ffmpeg not found in PATH");
///
/// muxer
///     .mux(
///         Path::new("p01.video.tmp"),
///         Path::new("p01.audio.tmp"),
///         Path::new("Demo.mp4"),
///         &CancellationToken::new(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    binary_path: Option<PathBuf>,
    audio_codec: String,
}

impl FfmpegMuxer {
    /// Muxer running the executable at `binary_path`, re-encoding audio to AAC
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path: Some(binary_path),
            audio_codec: "aac".to_string(),
        }
    }

    /// Attempt to find `ffmpeg` in PATH
    ///
    /// # Returns
    ///
    /// `Some(FfmpegMuxer)` if the binary is found, `None` otherwise.
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    /// Muxer configured from [`ToolsConfig`]
    ///
    /// An explicit `muxer_path` wins; otherwise PATH is searched when
    /// `search_path` is set. With neither, every mux attempt fails with
    /// [`MuxError::Unavailable`] so the caller falls back to keeping the
    /// elementary files.
    pub fn from_config(config: &ToolsConfig) -> Self {
        let binary_path = config.muxer_path.clone().or_else(|| {
            if config.search_path {
                which::which("ffmpeg").ok()
            } else {
                None
            }
        });

        match &binary_path {
            Some(path) => tracing::debug!(path = %path.display(), "using muxer"),
            None => tracing::warn!("no muxer configured or found on PATH, muxing will fall back"),
        }

        Self {
            binary_path,
            audio_codec: config.audio_codec.clone(),
        }
    }

    /// Override the audio codec passed as `-c:a`
    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = codec.into();
        self
    }

    /// Configured executable, if any
    pub fn binary_path(&self) -> Option<&Path> {
        self.binary_path.as_deref()
    }

    fn check_preconditions(&self, video: &Path, audio: &Path) -> Result<PathBuf, MuxError> {
        let binary = self.binary_path.clone().ok_or(MuxError::Unavailable)?;
        if !binary.exists() {
            return Err(MuxError::NotFound(binary));
        }
        if !is_executable(&binary) {
            return Err(MuxError::NotExecutable(binary));
        }
        for input in [video, audio] {
            if !input.is_file() {
                return Err(MuxError::MissingInput(input.to_path_buf()));
            }
        }
        Ok(binary)
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<MuxOutcome, MuxError> {
        let binary = self.check_preconditions(video, audio)?;

        tracing::info!(
            muxer = %binary.display(),
            output = %output.display(),
            "muxing video and audio"
        );

        let child = Command::new(&binary)
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c:v", "copy", "-c:a", &self.audio_codec])
            .args(["-strict", "experimental", "-y"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MuxError::Spawn)?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(output = %output.display(), "mux cancelled, muxer killed");
                let _ = tokio::fs::remove_file(output).await;
                return Ok(MuxOutcome::Cancelled);
            }
            result = child.wait_with_output() => result.map_err(MuxError::Spawn)?,
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(MuxError::Execution {
                exit_code: result.status.code(),
                stderr: tail_chars(stderr.trim(), STDERR_TAIL_CHARS),
            });
        }

        if !output.is_file() {
            return Err(MuxError::MissingOutput(output.to_path_buf()));
        }

        Ok(MuxOutcome::Merged(output.to_path_buf()))
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Keep the last `max` characters; muxers print the interesting part last
fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max).collect();
    format!("…{}", tail)
}
