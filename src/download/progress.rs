//! Background progress reporting for a running range.

use crate::types::{Event, RangeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Parameters for spawning a progress reporter background task
pub(crate) struct ProgressReporterParams {
    /// Range being reported
    pub range_id: RangeId,
    /// Documents processed so far, shared with the worker
    pub documents: Arc<AtomicU64>,
    /// Interval between reports
    pub interval: Duration,
    /// Event broadcast sender
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Stops the reporter when the range ends
    pub cancel_token: tokio_util::sync::CancellationToken,
}

/// Spawn a background task that periodically reports range progress.
///
/// Reports are advisory; nothing is emitted for a tick in which the counter
/// did not move.
pub(crate) fn spawn_progress_reporter(
    params: ProgressReporterParams,
) -> tokio::task::JoinHandle<()> {
    let ProgressReporterParams {
        range_id,
        documents,
        interval,
        event_tx,
        cancel_token,
    } = params;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick completes immediately
        interval.tick().await;

        let mut last_reported = 0;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let current = documents.load(Ordering::Relaxed);
                    if current == last_reported {
                        continue;
                    }
                    last_reported = current;
                    tracing::info!(range_id = range_id.0, documents = current, "Range progress");
                    event_tx
                        .send(Event::Progress {
                            range_id,
                            documents: current,
                        })
                        .ok();
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}
