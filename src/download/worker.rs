//! Per-range download worker.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::convert::to_node_data;
use super::progress::{ProgressReporterParams, spawn_progress_reporter};
use crate::config::DownloadConfig;
use crate::error::{DownloadError, Error, Result};
use crate::partition::{Checkpoint, DownloadRange};
use crate::retry::download_with_retry;
use crate::source::DocumentSource;
use crate::types::{Event, RangeId, RunRecord};

/// Outcome of a fully downloaded range
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSummary {
    /// Range ID
    pub range_id: RangeId,
    /// Nodes enqueued for sorting
    pub documents: u64,
    /// Documents scanned but not enqueued (deleted)
    pub skipped: u64,
    /// Scan attempts, including the first
    pub attempts: u32,
    /// Last document handed downstream
    pub checkpoint: Option<Checkpoint>,
}

/// Parameters for constructing a [`DownloadWorker`]
pub struct WorkerParams {
    /// Database to scan
    pub source: Arc<dyn DocumentSource>,
    /// Queue feeding the sort stage
    pub sender: mpsc::Sender<RunRecord>,
    /// Timeouts, progress interval and retry policy
    pub config: DownloadConfig,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<Event>,
    /// Pipeline-wide cancellation
    pub cancel_token: CancellationToken,
}

/// Downloads one [`DownloadRange`] at a time into the sort queue.
///
/// The checkpoint only advances after a record has been accepted by the
/// queue, so a retry resumes exactly after the last document that made it
/// downstream: nothing is skipped and nothing is enqueued twice.
#[derive(Clone)]
pub struct DownloadWorker {
    source: Arc<dyn DocumentSource>,
    sender: mpsc::Sender<RunRecord>,
    config: DownloadConfig,
    event_tx: broadcast::Sender<Event>,
    cancel_token: CancellationToken,
}

/// Mutable progress of one `run` call, shared across its attempts
#[derive(Default)]
struct RangeProgress {
    checkpoint: Mutex<Option<Checkpoint>>,
    documents: Arc<AtomicU64>,
    skipped: AtomicU64,
    attempts: AtomicU32,
}

impl DownloadWorker {
    /// Create a worker
    pub fn new(params: WorkerParams) -> Self {
        let WorkerParams {
            source,
            sender,
            config,
            event_tx,
            cancel_token,
        } = params;
        Self {
            source,
            sender,
            config,
            event_tx,
            cancel_token,
        }
    }

    /// Download `range` completely.
    ///
    /// Transient failures are retried from the checkpoint with backoff. When
    /// retries run out, or the error is not retryable, this fails with
    /// [`DownloadError::Failed`]; when cancelled it fails with
    /// [`DownloadError::Interrupted`]. Both carry the checkpoint.
    pub async fn run(&self, range_id: RangeId, range: &DownloadRange) -> Result<RangeSummary> {
        tracing::info!(range_id = range_id.0, range = %range, "Range download started");
        self.event_tx
            .send(Event::RangeStarted {
                range_id,
                range: range.clone(),
            })
            .ok();

        let progress = RangeProgress::default();
        let reporter_cancel = self.cancel_token.child_token();
        let reporter = spawn_progress_reporter(ProgressReporterParams {
            range_id,
            documents: Arc::clone(&progress.documents),
            interval: self.config.progress_interval,
            event_tx: self.event_tx.clone(),
            cancel_token: reporter_cancel.clone(),
        });

        let result = {
            let progress = &progress;
            download_with_retry(&self.config.retry, &self.cancel_token, move |attempt| {
                progress.attempts.store(attempt + 1, Ordering::Relaxed);
                self.scan_attempt(range_id, range, attempt, progress)
            })
            .await
        };

        reporter_cancel.cancel();
        if let Err(e) = reporter.await {
            tracing::warn!(range_id = range_id.0, error = %e, "Progress reporter panicked");
        }

        let checkpoint = progress.checkpoint.lock().await.clone();
        let documents = progress.documents.load(Ordering::Relaxed);
        let attempts = progress.attempts.load(Ordering::Relaxed);

        match result {
            Ok(()) => {
                tracing::info!(
                    range_id = range_id.0,
                    documents,
                    attempts,
                    "Range download completed"
                );
                self.event_tx
                    .send(Event::RangeCompleted {
                        range_id,
                        documents,
                    })
                    .ok();
                Ok(RangeSummary {
                    range_id,
                    documents,
                    skipped: progress.skipped.load(Ordering::Relaxed),
                    attempts,
                    checkpoint,
                })
            }
            Err(e) => {
                let interrupted = self.cancel_token.is_cancelled() || matches!(e, Error::Cancelled);
                let err = if interrupted {
                    tracing::info!(
                        range_id = range_id.0,
                        documents,
                        checkpoint = ?checkpoint,
                        "Range download interrupted"
                    );
                    DownloadError::Interrupted { checkpoint }
                } else {
                    tracing::error!(
                        range_id = range_id.0,
                        error = %e,
                        attempts,
                        checkpoint = ?checkpoint,
                        "Range download failed"
                    );
                    DownloadError::Failed {
                        range: range.clone(),
                        checkpoint,
                        attempts,
                        reason: e.to_string(),
                    }
                };
                self.event_tx
                    .send(Event::RangeFailed {
                        range_id,
                        error: err.to_string(),
                        interrupted,
                    })
                    .ok();
                Err(err.into())
            }
        }
    }

    async fn scan_attempt(
        &self,
        range_id: RangeId,
        range: &DownloadRange,
        attempt: u32,
        progress: &RangeProgress,
    ) -> Result<()> {
        let checkpoint = progress.checkpoint.lock().await.clone();
        let effective = match &checkpoint {
            Some(cp) => range.resume_from(cp),
            None => range.clone(),
        };
        if attempt > 0 {
            tracing::info!(range_id = range_id.0, attempt, resume = %effective, "Resuming range");
            self.event_tx
                .send(Event::RangeRetrying {
                    range_id,
                    attempt: attempt + 1,
                    checkpoint,
                })
                .ok();
        }

        let mut cursor = self.pull(self.source.scan(&effective)).await?;
        while let Some(doc) = self.pull(cursor.next_document()).await? {
            match to_node_data(&doc)? {
                Some(node) => {
                    let record = RunRecord::new(node, doc.modified);
                    tokio::select! {
                        biased;
                        _ = self.cancel_token.cancelled() => return Err(Error::Cancelled),
                        sent = self.sender.send(record) => {
                            // the sort stage only drops the receiver when shutting down
                            sent.map_err(|_| Error::Cancelled)?;
                        }
                    }
                    progress.documents.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    progress.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }

            *progress.checkpoint.lock().await = Some(Checkpoint {
                modified: doc.modified,
                id: doc.id,
            });
        }
        Ok(())
    }

    /// Await one source call, bounded by the scan timeout and cancellation
    async fn pull<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.scan_timeout;
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(DownloadError::transient(format!(
                    "source call exceeded {}ms",
                    timeout.as_millis()
                ))
                .into()),
            },
        }
    }
}
