//! Test configuration helpers: scratch directories and fast retry settings

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flatfile_dl::config::RetryConfig;
use flatfile_dl::{Config, DocumentSource, Pipeline};
use tempfile::TempDir;

/// Scratch directory holding the spill root and the output file
pub struct TestEnv {
    /// Keeps the directory alive for the test
    pub dir: TempDir,
    /// Configuration pointing into `dir`
    pub config: Config,
}

impl TestEnv {
    /// Output path inside the scratch directory
    pub fn output(&self) -> &Path {
        &self.config.output.path
    }

    /// Parent of the per-run spill directories
    pub fn spill_root(&self) -> PathBuf {
        self.dir.path().join("spill")
    }

    /// Build a pipeline from the current configuration
    pub fn pipeline(&self, source: Arc<dyn DocumentSource>) -> Pipeline {
        Pipeline::new(self.config.clone(), source).expect("valid test configuration")
    }
}

/// Create a test environment writing to `output_name`
///
/// Uses a small spill threshold so every run exercises the spill path, a
/// tiny queue, and millisecond retry backoff without jitter.
pub fn test_env(output_name: &str) -> TestEnv {
    let dir = tempfile::tempdir().expect("create temp dir");
    std::fs::create_dir(dir.path().join("spill")).expect("create spill root");

    let mut config = Config::default();
    config.sort.spill_threshold_bytes = 1024;
    config.sort.spill_dir = Some(dir.path().join("spill"));
    config.output.path = dir.path().join(output_name);
    config.pipeline.queue_capacity = 8;
    config.download.scan_timeout = Duration::from_secs(5);
    config.download.progress_interval = Duration::from_millis(25);
    config.download.retry = fast_retry(3);

    TestEnv { dir, config }
}

/// Retry policy with millisecond backoff and no jitter
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}
