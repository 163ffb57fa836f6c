//! Shared test helpers: document builders and a fault-injecting source.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::config::{DownloadConfig, RetryConfig};
use crate::error::{DownloadError, Result};
use crate::partition::DownloadRange;
use crate::source::{DocumentCursor, DocumentSource, MemoryDocumentSource, RawDocument};

/// Document for `/{parent}/{name}` with a `title` property
pub(crate) fn doc(parent: &str, name: &str, modified: i64) -> RawDocument {
    RawDocument::new(format!("2:/{parent}/{name}"), modified).with_field("title", name)
}

/// `count` documents `/{parent}/n000 ..` modified at `first_modified`, `first_modified + 1`, ...
pub(crate) fn docs(parent: &str, count: usize, first_modified: i64) -> Vec<RawDocument> {
    (0..count)
        .map(|i| doc(parent, &format!("n{i:03}"), first_modified + i as i64))
        .collect()
}

/// Download settings with millisecond backoff and no jitter
pub(crate) fn fast_download_config(max_attempts: u32) -> DownloadConfig {
    DownloadConfig {
        scan_timeout: Duration::from_secs(5),
        progress_interval: Duration::from_millis(20),
        retry: RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        },
    }
}

/// Wraps a [`MemoryDocumentSource`] and injects failures into its cursors.
///
/// The first `failures` cursors fail after yielding `fail_after` documents;
/// later cursors run clean. Every requested range is recorded.
pub(crate) struct FlakySource {
    inner: MemoryDocumentSource,
    fail_after: usize,
    failures: AtomicU32,
    permanent: bool,
    pull_delay: Option<Duration>,
    scans: tokio::sync::Mutex<Vec<DownloadRange>>,
}

impl FlakySource {
    pub(crate) fn new(inner: MemoryDocumentSource) -> Self {
        Self {
            inner,
            fail_after: 0,
            failures: AtomicU32::new(0),
            permanent: false,
            pull_delay: None,
            scans: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `failures` scans after `fail_after` documents each
    pub(crate) fn failing(mut self, fail_after: usize, failures: u32) -> Self {
        self.fail_after = fail_after;
        self.failures = AtomicU32::new(failures);
        self
    }

    /// Injected failures are permanent source errors instead of transient ones
    pub(crate) fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    /// Sleep before every cursor pull
    pub(crate) fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = Some(delay);
        self
    }

    /// Ranges passed to `scan`, in call order
    pub(crate) async fn scans(&self) -> Vec<DownloadRange> {
        self.scans.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl DocumentSource for FlakySource {
    async fn scan(&self, range: &DownloadRange) -> Result<Box<dyn DocumentCursor>> {
        self.scans.lock().await.push(range.clone());
        let fails = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(Box::new(FlakyCursor {
            inner: self.inner.scan(range).await?,
            remaining_before_failure: fails.then_some(self.fail_after),
            permanent: self.permanent,
            pull_delay: self.pull_delay,
        }))
    }
}

struct FlakyCursor {
    inner: Box<dyn DocumentCursor>,
    remaining_before_failure: Option<usize>,
    permanent: bool,
    pull_delay: Option<Duration>,
}

#[async_trait::async_trait]
impl DocumentCursor for FlakyCursor {
    async fn next_document(&mut self) -> Result<Option<RawDocument>> {
        if let Some(delay) = self.pull_delay {
            tokio::time::sleep(delay).await;
        }
        match self.remaining_before_failure {
            Some(0) if self.permanent => Err(DownloadError::Source {
                message: "injected permanent failure".to_string(),
            }
            .into()),
            Some(0) => Err(DownloadError::transient("injected connection reset").into()),
            Some(ref mut n) => {
                *n -= 1;
                self.inner.next_document().await
            }
            None => self.inner.next_document().await,
        }
    }
}
