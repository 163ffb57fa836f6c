//! Pipeline coordinator.
//!
//! Wires the stages together for one extraction run:
//! - partitions the domain into ranges ([`RangePartitioner`])
//! - runs one [`DownloadWorker`] task per range, all feeding a bounded queue
//! - drains the queue into a single [`SortSpillStage`]
//! - merges the sorted runs into the flat file on a blocking thread
//!
//! - [`tracker`] - Per-range status map
//! - [`report`] - Serializable run summary

mod report;
mod tracker;


pub use report::{PipelineReport, RangeReport};
pub use tracker::RangeState;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::download::{DownloadWorker, RangeSummary, WorkerParams};
use crate::error::{DownloadError, Error, Result};
use crate::merge;
use crate::partition::{DownloadRange, RangePartitioner};
use crate::sort::{SortOutput, SortSpillStage};
use crate::source::DocumentSource;
use crate::types::{Event, RangeId};
use tracker::{RangeTracker, remaining_range};

/// Event channel capacity
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Prefix of the per-run spill directory
const SPILL_DIR_PREFIX: &str = "flatfile-spill-";

/// Extraction pipeline (cloneable - all fields are Arc-wrapped)
///
/// One run at a time. Cancellation is final: once [`cancel`](Self::cancel)
/// has been called, or the deadline has expired, every later run fails with
/// [`Error::Cancelled`]; build a new pipeline to resume.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    source: Arc<dyn DocumentSource>,
    event_tx: broadcast::Sender<Event>,
    cancel_token: CancellationToken,
    tracker: RangeTracker,
    run_lock: Arc<Mutex<()>>,
}

impl Pipeline {
    /// Create a pipeline reading from `source`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is invalid.
    pub fn new(config: Config, source: Arc<dyn DocumentSource>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            source,
            event_tx,
            cancel_token: CancellationToken::new(),
            tracker: RangeTracker::default(),
            run_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Stop every stage; the running call returns [`Error::Cancelled`]
    pub fn cancel(&self) {
        tracing::info!("Pipeline cancellation requested");
        self.cancel_token.cancel();
    }

    /// Token cancelled when the pipeline is
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Status of every range of the current (or last) run
    pub async fn range_statuses(&self) -> BTreeMap<RangeId, RangeState> {
        self.tracker.states().await
    }

    /// Unfinished parts of the current (or last) run's ranges
    ///
    /// Useful after a cancelled run, which produces no report.
    pub async fn resumable_ranges(&self) -> Vec<DownloadRange> {
        self.tracker
            .entries()
            .await
            .iter()
            .filter_map(|(_, range, state)| remaining_range(range, state))
            .collect()
    }

    /// Extract `[partition.domain_start, now)` (open-ended) into the flat file
    pub async fn run(&self) -> Result<PipelineReport> {
        let partitioner = RangePartitioner::new(self.config.partition.parallelism);
        let ranges = partitioner.split_until_now(self.config.partition.domain_start)?;
        self.run_ranges(ranges).await
    }

    /// Extract exactly `ranges` into the flat file
    ///
    /// Returns a report once the flat file is written, even when some ranges
    /// failed; see [`PipelineReport::into_result`].
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] on cancellation or deadline expiry
    /// - the first fatal range error when `pipeline.fail_fast` is set
    /// - spill, merge and I/O errors
    pub async fn run_ranges(&self, ranges: Vec<DownloadRange>) -> Result<PipelineReport> {
        let _running = self
            .run_lock
            .try_lock()
            .map_err(|_| Error::Other("pipeline is already running".to_string()))?;
        if self.cancel_token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let started_at = chrono::Utc::now();
        let ranges: Vec<(RangeId, DownloadRange)> = ranges
            .into_iter()
            .enumerate()
            .map(|(i, range)| (RangeId(i), range))
            .collect();
        self.tracker.reset(&ranges).await;

        let spill_root = self.config.spill_root();
        let spill_dir = tempfile::Builder::new()
            .prefix(SPILL_DIR_PREFIX)
            .tempdir_in(&spill_root)?;
        tracing::info!(
            ranges = ranges.len(),
            output = %self.config.output.path.display(),
            spill_dir = %spill_dir.path().display(),
            "Extraction started"
        );

        let deadline_hit = Arc::new(AtomicBool::new(false));
        let deadline = self.spawn_deadline(Arc::clone(&deadline_hit));

        let result = self
            .extract(&ranges, spill_dir.path(), started_at)
            .await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }
        if let Err(e) = spill_dir.close() {
            tracing::warn!(error = %e, "Failed to remove spill directory");
        }

        if let Err(e) = &result {
            // nothing of this run reached the flat file
            self.tracker
                .reopen_completed(&format!("flat file not written: {e}"))
                .await;
        }

        match result {
            Ok(report) => Ok(report),
            Err(Error::Cancelled) => {
                if deadline_hit.load(Ordering::SeqCst) {
                    tracing::warn!("Extraction stopped by deadline");
                } else {
                    tracing::info!("Extraction cancelled");
                }
                self.event_tx.send(Event::Cancelled).ok();
                Err(Error::Cancelled)
            }
            Err(e) => {
                tracing::error!(error = %e, "Extraction failed");
                Err(e)
            }
        }
    }

    async fn extract(
        &self,
        ranges: &[(RangeId, DownloadRange)],
        spill_dir: &Path,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<PipelineReport> {
        let config = &self.config;
        let (tx, rx) = mpsc::channel(config.pipeline.queue_capacity);

        let sort_stage = SortSpillStage::new(&config.sort, spill_dir)
            .with_zstd_level(config.output.zstd_level)
            .with_events(self.event_tx.clone());
        let sorter = tokio::spawn(sort_stage.run(rx, self.cancel_token.clone()));

        let mut workers = JoinSet::new();
        for (range_id, range) in ranges {
            let worker = DownloadWorker::new(WorkerParams {
                source: Arc::clone(&self.source),
                sender: tx.clone(),
                config: config.download.clone(),
                event_tx: self.event_tx.clone(),
                cancel_token: self.cancel_token.clone(),
            });
            let tracker = self.tracker.clone();
            let range_id = *range_id;
            let range = range.clone();
            workers.spawn(async move {
                tracker.set(range_id, RangeState::Running).await;
                (range_id, worker.run(range_id, &range).await)
            });
        }
        // the queue closes once every worker is done
        drop(tx);

        let fatal = self.collect_workers(&mut workers).await;

        let sorted = sorter
            .await
            .map_err(|e| Error::Other(format!("sort task failed: {e}")))?;
        if let Some(e) = fatal {
            // fail-fast already cancelled the sort stage, which removed its spills
            if let Ok(output) = sorted {
                discard_runs(output);
            }
            return Err(e);
        }
        if self.cancel_token.is_cancelled() {
            if let Ok(output) = sorted {
                discard_runs(output);
            }
            return Err(Error::Cancelled);
        }
        let SortOutput { runs, stats: sort } = sorted?;

        let run_count = runs.len();
        tracing::info!(runs = run_count, records = sort.records, "Merging sorted runs");
        self.event_tx.send(Event::MergeStarted { runs: run_count }).ok();

        let output = config.output.path.clone();
        let level = config.output.zstd_level;
        let cancel = self.cancel_token.clone();
        let target = output.clone();
        let merge = tokio::task::spawn_blocking(move || {
            merge::merge_to_file(runs, &target, level, &cancel)
        })
        .await
        .map_err(|e| Error::Other(format!("merge task failed: {e}")))??;

        self.event_tx
            .send(Event::MergeComplete {
                records: merge.records,
                duplicates: merge.duplicates,
            })
            .ok();

        let ranges = self
            .tracker
            .entries()
            .await
            .into_iter()
            .map(|(range_id, range, state)| RangeReport {
                range_id,
                range,
                state,
            })
            .collect();
        let report = PipelineReport {
            ranges,
            sort,
            merge,
            output,
            tolerate_partial: config.pipeline.tolerate_partial,
            started_at,
            finished_at: chrono::Utc::now(),
        };
        tracing::info!(
            records = report.merge.records,
            duplicates = sort.duplicates + report.merge.duplicates,
            failed = report.failed_ranges().len(),
            "Extraction finished"
        );
        Ok(report)
    }

    /// Wait for every worker, recording range states.
    ///
    /// Returns the first fatal error when fail-fast is on.
    async fn collect_workers(
        &self,
        workers: &mut JoinSet<(RangeId, Result<RangeSummary>)>,
    ) -> Option<Error> {
        let mut fatal = None;
        while let Some(joined) = workers.join_next().await {
            let (range_id, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Range worker task failed");
                    if self.config.pipeline.fail_fast && fatal.is_none() {
                        self.cancel_token.cancel();
                        fatal = Some(Error::Other(format!("range worker task failed: {e}")));
                    }
                    continue;
                }
            };

            let state = match result {
                Ok(summary) => RangeState::Completed {
                    documents: summary.documents,
                },
                Err(Error::Download(DownloadError::Interrupted { checkpoint })) => {
                    RangeState::FailedRetryable {
                        checkpoint,
                        error: "cancelled before completion".to_string(),
                    }
                }
                Err(e) => {
                    let checkpoint = match &e {
                        Error::Download(err) => err.checkpoint().cloned(),
                        _ => None,
                    };
                    let state = RangeState::FailedFatal {
                        checkpoint,
                        error: e.to_string(),
                    };
                    if self.config.pipeline.fail_fast && fatal.is_none() {
                        tracing::warn!(range_id = range_id.0, "Fail-fast: cancelling remaining ranges");
                        self.cancel_token.cancel();
                        fatal = Some(e);
                    }
                    state
                }
            };
            self.tracker.set(range_id, state).await;
        }
        self.tracker.fail_unfinished("range worker task failed").await;
        fatal
    }

    fn spawn_deadline(&self, hit: Arc<AtomicBool>) -> Option<tokio::task::JoinHandle<()>> {
        let deadline = self.config.pipeline.deadline?;
        let cancel = self.cancel_token.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    tracing::warn!(deadline_secs = deadline.as_secs_f64(), "Deadline expired, cancelling");
                    hit.store(true, Ordering::SeqCst);
                    cancel.cancel();
                }
            }
        }))
    }
}

fn discard_runs(output: SortOutput) {
    for run in output.runs {
        run.discard();
    }
}
