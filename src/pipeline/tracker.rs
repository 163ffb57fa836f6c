//! Per-range status bookkeeping.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::partition::{Checkpoint, DownloadRange};
use crate::types::RangeId;

/// Lifecycle of one range within a pipeline run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RangeState {
    /// Not started yet
    Pending,
    /// A worker is scanning it
    Running,
    /// Every document was handed to the sort stage and the flat file was written
    Completed {
        /// Nodes enqueued
        documents: u64,
    },
    /// Stopped by cancellation, the deadline or a failure after the download;
    /// safe to resume from `checkpoint`
    FailedRetryable {
        /// Last enqueued document
        #[serde(skip_serializing_if = "Option::is_none")]
        checkpoint: Option<Checkpoint>,
        /// What stopped it
        error: String,
    },
    /// Failed on its own (retries exhausted or a permanent error)
    FailedFatal {
        /// Last enqueued document
        #[serde(skip_serializing_if = "Option::is_none")]
        checkpoint: Option<Checkpoint>,
        /// The last underlying error
        error: String,
    },
}

impl RangeState {
    /// Whether the range still needs to be run
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            RangeState::FailedRetryable { .. } | RangeState::FailedFatal { .. }
        )
    }

    /// Checkpoint of a failed range
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            RangeState::FailedRetryable { checkpoint, .. }
            | RangeState::FailedFatal { checkpoint, .. } => checkpoint.as_ref(),
            _ => None,
        }
    }
}

/// The part of `range` still left to download given its final `state`.
///
/// `None` when the range completed.
pub(crate) fn remaining_range(range: &DownloadRange, state: &RangeState) -> Option<DownloadRange> {
    match state {
        RangeState::Completed { .. } => None,
        other => Some(match other.checkpoint() {
            Some(cp) => range.resume_from(cp),
            None => range.clone(),
        }),
    }
}

/// Shared status map for the ranges of the current run
#[derive(Clone, Default)]
pub(crate) struct RangeTracker {
    ranges: Arc<RwLock<BTreeMap<RangeId, (DownloadRange, RangeState)>>>,
}

impl RangeTracker {
    /// Forget the previous run and register `ranges` as pending
    pub(crate) async fn reset(&self, ranges: &[(RangeId, DownloadRange)]) {
        let mut map = self.ranges.write().await;
        map.clear();
        for (id, range) in ranges {
            map.insert(*id, (range.clone(), RangeState::Pending));
        }
    }

    pub(crate) async fn set(&self, id: RangeId, state: RangeState) {
        if let Some(entry) = self.ranges.write().await.get_mut(&id) {
            tracing::trace!(range_id = id.0, state = ?state, "Range state changed");
            entry.1 = state;
        }
    }

    /// Mark ranges that never reached a terminal state as fatally failed
    pub(crate) async fn fail_unfinished(&self, error: &str) {
        for (id, (_, state)) in self.ranges.write().await.iter_mut() {
            if matches!(state, RangeState::Pending | RangeState::Running) {
                tracing::error!(range_id = id.0, error, "Range did not finish");
                *state = RangeState::FailedFatal {
                    checkpoint: None,
                    error: error.to_string(),
                };
            }
        }
    }

    /// Reopen completed ranges whose documents never reached the flat file
    pub(crate) async fn reopen_completed(&self, error: &str) {
        for (id, (_, state)) in self.ranges.write().await.iter_mut() {
            if let RangeState::Completed { documents } = state {
                tracing::warn!(range_id = id.0, documents = *documents, error, "Completed range reopened");
                *state = RangeState::FailedRetryable {
                    checkpoint: None,
                    error: error.to_string(),
                };
            }
        }
    }

    pub(crate) async fn states(&self) -> BTreeMap<RangeId, RangeState> {
        self.ranges
            .read()
            .await
            .iter()
            .map(|(id, (_, state))| (*id, state.clone()))
            .collect()
    }

    pub(crate) async fn entries(&self) -> Vec<(RangeId, DownloadRange, RangeState)> {
        self.ranges
            .read()
            .await
            .iter()
            .map(|(id, (range, state))| (*id, range.clone(), state.clone()))
            .collect()
    }
}
