//! Configuration types for flatfile-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for an extraction run
///
/// Every field has a default, so `Config::default()` (or `{}` in JSON) is a
/// valid starting point that only needs an output path.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// How the modification-time domain is split
    #[serde(default)]
    pub partition: PartitionConfig,

    /// Per-range download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Sort buffer and spill settings
    #[serde(default)]
    pub sort: SortConfig,

    /// Final flat file
    #[serde(default)]
    pub output: OutputConfig,

    /// Coordinator policy (queue size, failure handling, deadline)
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Reject settings that cannot produce a working pipeline
    pub fn validate(&self) -> Result<()> {
        if self.partition.parallelism == 0 {
            return Err(Error::config(
                "partition.parallelism",
                "must be at least 1",
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(Error::config(
                "pipeline.queue_capacity",
                "must be at least 1",
            ));
        }
        if self.sort.spill_threshold_bytes == 0 {
            return Err(Error::config(
                "sort.spill_threshold_bytes",
                "must be greater than zero",
            ));
        }
        if self.download.scan_timeout.is_zero() {
            return Err(Error::config(
                "download.scan_timeout",
                "must be greater than zero",
            ));
        }
        if self.download.progress_interval.is_zero() {
            return Err(Error::config(
                "download.progress_interval",
                "must be greater than zero",
            ));
        }
        let retry = &self.download.retry;
        if !(retry.backoff_multiplier.is_finite() && retry.backoff_multiplier >= 1.0) {
            return Err(Error::config(
                "download.retry.backoff_multiplier",
                format!("must be at least 1.0, got {}", retry.backoff_multiplier),
            ));
        }
        if retry.initial_delay > retry.max_delay {
            return Err(Error::config(
                "download.retry.initial_delay",
                "must not exceed max_delay",
            ));
        }
        let levels = zstd::compression_level_range();
        if !levels.contains(&self.output.zstd_level) {
            return Err(Error::config(
                "output.zstd_level",
                format!(
                    "{} is outside {}..={}",
                    self.output.zstd_level,
                    levels.start(),
                    levels.end()
                ),
            ));
        }
        if self.output.path.as_os_str().is_empty() {
            return Err(Error::config("output.path", "must not be empty"));
        }
        Ok(())
    }

    /// Directory that receives the per-run spill directory
    pub fn spill_root(&self) -> PathBuf {
        self.sort
            .spill_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Range partitioning settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Number of ranges (and parallel workers) per run (default: 4)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Lower bound of the modification-time domain, in seconds (default: 0)
    #[serde(default)]
    pub domain_start: i64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            domain_start: 0,
        }
    }
}

/// Download worker settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Upper bound on a single cursor pull (default: 60 seconds)
    ///
    /// A pull that exceeds this is treated as a transient failure.
    #[serde(default = "default_scan_timeout", with = "duration_serde")]
    pub scan_timeout: Duration,

    /// How often per-range progress is reported (default: 10 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,

    /// Retry policy for transient scan failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            scan_timeout: default_scan_timeout(),
            progress_interval: default_progress_interval(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Sort buffer settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SortConfig {
    /// Estimated buffer size that triggers a spill (default: 64 MiB)
    #[serde(default = "default_spill_threshold")]
    pub spill_threshold_bytes: usize,

    /// Parent directory for spill files (None = system temp directory)
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,

    /// zstd-compress spilled runs (default: false)
    #[serde(default)]
    pub compress_spills: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            spill_threshold_bytes: default_spill_threshold(),
            spill_dir: None,
            compress_spills: false,
        }
    }
}

/// Flat file output settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output path; `.lz4` selects LZ4 frames, `.zst` zstd framing (default: "flatfile.bin")
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    /// zstd level for compressed output and spills (default: 3)
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            zstd_level: default_zstd_level(),
        }
    }
}

/// Coordinator policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Records buffered between workers and the sort stage (default: 10000)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Cancel everything on the first fatal range error (default: false)
    #[serde(default)]
    pub fail_fast: bool,

    /// Treat a run with fatal ranges as successful (default: false)
    ///
    /// The flat file is written either way; this only affects
    /// [`PipelineReport::exit_code`](crate::PipelineReport::exit_code).
    #[serde(default)]
    pub tolerate_partial: bool,

    /// Global deadline for the whole run (None = no deadline)
    #[serde(default, with = "optional_duration_serde")]
    pub deadline: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            fail_fast: false,
            tolerate_partial: false,
            deadline: None,
        }
    }
}

// Default value functions
fn default_parallelism() -> usize {
    4
}

fn default_scan_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_spill_threshold() -> usize {
    64 * 1024 * 1024
}

fn default_output_path() -> PathBuf {
    PathBuf::from("flatfile.bin")
}

fn default_zstd_level() -> i32 {
    3
}

fn default_queue_capacity() -> usize {
    10_000
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

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
