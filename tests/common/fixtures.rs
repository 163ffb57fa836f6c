//! Document fixtures and a fault-injecting source

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use flatfile_dl::error::DownloadError;
use flatfile_dl::{
    DocumentCursor, DocumentSource, DownloadRange, MemoryDocumentSource, RangePartitioner,
    RawDocument, Result,
};

/// Document for `/{parent}/{name}` with a `title` and a `jcr:primaryType`
pub fn document(parent: &str, name: &str, modified: i64) -> RawDocument {
    RawDocument::new(format!("2:/{parent}/{name}"), modified)
        .with_field("title", name)
        .with_field("jcr:primaryType", "nam:nt:unstructured")
}

/// `count` documents `/{parent}/n000 ..` modified from `first_modified` upwards
pub fn documents(parent: &str, count: usize, first_modified: i64) -> Vec<RawDocument> {
    (0..count)
        .map(|i| document(parent, &format!("n{i:03}"), first_modified + i as i64))
        .collect()
}

/// Thirty documents over three partitions:
/// `/a/*` in `[100, 110)`, `/b/*` in `[110, 120)` and `/c/*` in `[120, +inf)`
pub fn three_partitions() -> (MemoryDocumentSource, Vec<DownloadRange>) {
    let mut all = documents("a", 10, 100);
    all.extend(documents("b", 10, 110));
    all.extend(documents("c", 10, 120));
    let ranges = RangePartitioner::new(3)
        .split(100, 130)
        .expect("valid domain");
    (MemoryDocumentSource::from_documents(all), ranges)
}

/// Thirty documents `/a/1 .. /a/30` over three partitions of ten:
/// `/a/1..10` in `[100, 110)`, `/a/11..20` in `[110, 120)` and `/a/21..30`
/// in `[120, +inf)`, so their paths interleave once sorted
pub fn interleaved_partitions() -> (MemoryDocumentSource, Vec<DownloadRange>) {
    let all = (1..=30).map(|i| document("a", &i.to_string(), 99 + i));
    let ranges = RangePartitioner::new(3)
        .split(100, 130)
        .expect("valid domain");
    (MemoryDocumentSource::from_documents(all), ranges)
}

/// Every path [`three_partitions`] holds, in flat-file order
pub fn three_partition_paths() -> Vec<String> {
    ["a", "b", "c"]
        .iter()
        .flat_map(|parent| (0..10).map(move |i| format!("/{parent}/n{i:03}")))
        .collect()
}

/// Wraps a [`MemoryDocumentSource`] and injects failures and latency
///
/// The first `failing_scans` cursors fail after yielding `fail_after`
/// documents; later cursors run clean.
pub struct FaultySource {
    inner: MemoryDocumentSource,
    fail_after: usize,
    failing_scans: AtomicU32,
    permanent: bool,
    pull_delay: Option<Duration>,
}

impl FaultySource {
    /// Wrap `inner` without faults
    pub fn new(inner: MemoryDocumentSource) -> Self {
        Self {
            inner,
            fail_after: 0,
            failing_scans: AtomicU32::new(0),
            permanent: false,
            pull_delay: None,
        }
    }

    /// Fail the first `scans` cursors after `after` documents each
    pub fn fail_scans(mut self, scans: u32, after: usize) -> Self {
        self.failing_scans = AtomicU32::new(scans);
        self.fail_after = after;
        self
    }

    /// Injected failures are permanent instead of transient
    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    /// Sleep before every cursor pull
    pub fn pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl DocumentSource for FaultySource {
    async fn scan(&self, range: &DownloadRange) -> Result<Box<dyn DocumentCursor>> {
        let fails = self
            .failing_scans
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(Box::new(FaultyCursor {
            inner: self.inner.scan(range).await?,
            remaining: fails.then_some(self.fail_after),
            permanent: self.permanent,
            pull_delay: self.pull_delay,
        }))
    }
}

struct FaultyCursor {
    inner: Box<dyn DocumentCursor>,
    remaining: Option<usize>,
    permanent: bool,
    pull_delay: Option<Duration>,
}

#[async_trait::async_trait]
impl DocumentCursor for FaultyCursor {
    async fn next_document(&mut self) -> Result<Option<RawDocument>> {
        if let Some(delay) = self.pull_delay {
            tokio::time::sleep(delay).await;
        }
        match self.remaining {
            Some(0) if self.permanent => Err(DownloadError::Source {
                message: "permission denied".to_string(),
            }
            .into()),
            Some(0) => Err(DownloadError::transient("connection reset by peer").into()),
            Some(ref mut n) => {
                *n -= 1;
                self.inner.next_document().await
            }
            None => self.inner.next_document().await,
        }
    }
}
