//! Configuration types for dash-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Browser-like User-Agent sent with every page and stream request
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Referer sent with page and stream requests (the origin rejects requests without one)
pub const DEFAULT_REFERER: &str = "https://www.bilibili.com/";

/// Download behavior configuration (directories, concurrency, collisions)
///
/// Groups settings related to where tasks write their files and how many run at once.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Default destination directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Root of the per-task temp namespaces (default: "./temp")
    ///
    /// Each task writes its elementary streams under `<temp_dir>/<task id>/`.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum concurrently active tasks (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// What to do when the final output path already exists
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            file_collision: FileCollisionAction::default(),
        }
    }
}

/// Stream transfer configuration (retries, timeouts, progress cadence)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Retries after the first attempt on a transient network error (default: 3)
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0 = fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,

    /// Upper bound for a grown retry delay (default: 60 seconds)
    #[serde(default = "default_retry_max_delay", with = "duration_serde")]
    pub retry_max_delay: Duration,

    /// Add random jitter to retry delays (default: false)
    #[serde(default)]
    pub retry_jitter: bool,

    /// Per-request timeout; a timeout counts as a retryable network error (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Progress is reported every this many megabytes transferred (default: 10)
    #[serde(default = "default_resume_chunk_size")]
    pub resume_chunk_size: u64,

    /// User-Agent header for page and stream requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_delay: default_retry_delay(),
            retry_backoff_multiplier: default_backoff_multiplier(),
            retry_max_delay: default_retry_max_delay(),
            retry_jitter: false,
            request_timeout: default_request_timeout(),
            resume_chunk_size: default_resume_chunk_size(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    /// Retry policy for stream transfers
    ///
    /// With the default multiplier of 1.0 this is `retry_count` retries at a
    /// fixed `retry_delay`; a larger multiplier grows the delay up to
    /// `retry_max_delay`.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_count,
            initial_delay: self.retry_delay,
            max_delay: self.retry_max_delay.max(self.retry_delay),
            backoff_multiplier: self.retry_backoff_multiplier,
            jitter: self.retry_jitter,
        }
    }

    /// Progress report cadence in bytes
    pub fn progress_interval_bytes(&self) -> u64 {
        self.resume_chunk_size.max(1).saturating_mul(1024 * 1024)
    }
}

/// Page resolution and series probing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Referer header value sent with page and stream requests
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Lower bound of the randomized pause between series part probes (default: 1 second)
    #[serde(default = "default_part_delay_min", with = "duration_serde")]
    pub part_delay_min: Duration,

    /// Upper bound of the randomized pause between series part probes (default: 3 seconds)
    #[serde(default = "default_part_delay_max", with = "duration_serde")]
    pub part_delay_max: Duration,

    /// Upper bound on parts discovered by probing when the page has no part-count marker
    #[serde(default = "default_max_probe_parts")]
    pub max_probe_parts: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            referer: default_referer(),
            part_delay_min: default_part_delay_min(),
            part_delay_max: default_part_delay_max(),
            max_probe_parts: default_max_probe_parts(),
        }
    }
}

/// External muxer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the muxer executable (auto-detected if None)
    #[serde(default)]
    pub muxer_path: Option<PathBuf>,

    /// Whether to search PATH for `ffmpeg` when `muxer_path` is not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Codec the audio track is re-encoded to while muxing (default: "aac")
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            muxer_path: None,
            search_path: true,
            audio_codec: default_audio_codec(),
        }
    }
}

/// Task store location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// JSON snapshot of all tasks (default: "./data/tasks.json")
    #[serde(default = "default_tasks_file")]
    pub tasks_file: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            tasks_file: default_tasks_file(),
        }
    }
}

/// Main configuration for the task scheduler
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - directories, concurrency, collisions
/// - [`fetch`](FetchConfig) - retries, timeouts, progress cadence
/// - [`tools`](ToolsConfig) - muxer path and codec
/// - [`resolver`](ResolverConfig) - referer, series probing
/// - [`persistence`](PersistenceConfig) - task store file
///
/// The first three are flattened, so the JSON form exposes keys such as
/// `max_concurrent_downloads`, `retry_count`, `resume_chunk_size`,
/// `request_timeout` and `muxer_path` at the top level.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directories, concurrency and collision handling
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Stream transfer settings
    #[serde(flatten)]
    pub fetch: FetchConfig,

    /// External muxer settings
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Page resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Task store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from a JSON file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file '{}': {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse config file '{}': {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and the configured muxer path
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads < 1 {
            return Err(invalid("max_concurrent_downloads", "must be at least 1"));
        }
        if self.fetch.retry_count < 1 {
            return Err(invalid("retry_count", "must be at least 1"));
        }
        if self.fetch.resume_chunk_size < 1 {
            return Err(invalid("resume_chunk_size", "must be at least 1 MB"));
        }
        let multiplier = self.fetch.retry_backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(invalid("retry_backoff_multiplier", "must be at least 1.0"));
        }
        if self.fetch.request_timeout.is_zero() {
            return Err(invalid("request_timeout", "must be greater than zero"));
        }
        if self.resolver.part_delay_min > self.resolver.part_delay_max {
            return Err(invalid(
                "part_delay_min",
                "must not be greater than part_delay_max",
            ));
        }
        if let Some(ref muxer) = self.tools.muxer_path
            && !muxer.exists()
        {
            return Err(invalid(
                "muxer_path",
                &format!("'{}' does not exist", muxer.display()),
            ));
        }
        Ok(())
    }

    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Temporary directory
    pub fn temp_dir(&self) -> &PathBuf {
        &self.download.temp_dir
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::Config {
        message: format!("{} {}", key, reason),
        key: Some(key.to_string()),
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first (default: 3)
    #[serde(default = "default_retry_count")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 2 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0 = fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_count(),
            initial_delay: default_retry_delay(),
            max_delay: default_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// File collision handling strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Overwrite existing file
    Overwrite,
    /// Fail the task, keep existing
    Skip,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_resume_chunk_size() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_referer() -> String {
    DEFAULT_REFERER.to_string()
}

fn default_part_delay_min() -> Duration {
    Duration::from_secs(1)
}

fn default_part_delay_max() -> Duration {
    Duration::from_secs(3)
}

fn default_max_probe_parts() -> u32 {
    200
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_tasks_file() -> PathBuf {
    PathBuf::from("./data/tasks.json")
}

fn default_true() -> bool {
    true
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.download.max_concurrent_downloads, 3);
        assert_eq!(config.fetch.retry_count, 3);
        assert_eq!(config.fetch.retry_delay, Duration::from_secs(2));
        assert_eq!(config.fetch.resume_chunk_size, 10);
        assert_eq!(config.fetch.progress_interval_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.tools.audio_codec, "aac");
        assert!(config.tools.muxer_path.is_none());
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn flattened_keys_appear_at_top_level() {
        let json = serde_json::to_value(Config::default()).expect("serialize failed");

        for key in [
            "max_concurrent_downloads",
            "retry_count",
            "resume_chunk_size",
            "request_timeout",
            "muxer_path",
        ] {
            assert!(json.get(key).is_some(), "missing top-level key {key}");
        }
        assert_eq!(json["request_timeout"], 30);
        assert!(json["persistence"]["tasks_file"].is_string());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"max_concurrent_downloads": 1, "retry_count": 5}"#)
                .expect("deserialize failed");

        assert_eq!(config.download.max_concurrent_downloads, 1);
        assert_eq!(config.fetch.retry_count, 5);
        assert_eq!(config.fetch.request_timeout, Duration::from_secs(30));
        assert_eq!(config.resolver.max_probe_parts, 200);
    }

    #[test]
    fn validate_rejects_zero_concurrency_with_key() {
        let mut config = Config::default();
        config.download.max_concurrent_downloads = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("max_concurrent_downloads"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_missing_muxer_path() {
        let mut config = Config::default();
        config.tools.muxer_path = Some(PathBuf::from("/definitely/not/here/ffmpeg"));

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("muxer_path")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_inverted_part_delay() {
        let mut config = Config::default();
        config.resolver.part_delay_min = Duration::from_secs(5);
        config.resolver.part_delay_max = Duration::from_secs(1);

        assert!(config.validate().is_err());
    }

    #[test]
    fn fetch_retry_config_is_fixed_delay() {
        let fetch = FetchConfig {
            retry_count: 4,
            retry_delay: Duration::from_secs(7),
            ..FetchConfig::default()
        };
        let retry = fetch.retry_config();

        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.initial_delay, Duration::from_secs(7));
        assert_eq!(retry.max_delay, Duration::from_secs(7));
        assert_eq!(retry.backoff_multiplier, 1.0);
        assert!(!retry.jitter);
    }

    #[test]
    fn fetch_backoff_and_jitter_reach_retry_config() {
        let config: Config = serde_json::from_str(
            r#"{"retry_delay": 1, "retry_backoff_multiplier": 2.0, "retry_max_delay": 8, "retry_jitter": true}"#,
        )
        .expect("deserialize failed");
        config.validate().expect("backoff settings must validate");

        let retry = config.fetch.retry_config();
        assert_eq!(retry.initial_delay, Duration::from_secs(1));
        assert_eq!(retry.max_delay, Duration::from_secs(8));
        assert_eq!(retry.backoff_multiplier, 2.0);
        assert!(retry.jitter);
    }

    #[test]
    fn validate_rejects_shrinking_backoff() {
        let mut config = Config::default();
        config.fetch.retry_backoff_multiplier = 0.5;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("retry_backoff_multiplier"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn from_file_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_concurrent_downloads": 2}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.download.max_concurrent_downloads, 2);

        std::fs::write(&path, r#"{"max_concurrent_downloads": 0}"#).unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn duration_serde_serializes_as_seconds() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            ..RetryConfig::default()
        };

        let json = serde_json::to_value(&config).expect("serialize failed");

        assert_eq!(
            json["initial_delay"], 5,
            "duration_serde must serialize Duration as integer seconds"
        );
        assert_eq!(json["max_delay"], 120);
    }
}
