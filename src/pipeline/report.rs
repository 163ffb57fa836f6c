//! Outcome of a finished pipeline run.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tracker::{RangeState, remaining_range};
use crate::error::{Error, Result};
use crate::merge::MergeStats;
use crate::partition::DownloadRange;
use crate::sort::SortStats;
use crate::types::RangeId;

/// Final state of one range
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeReport {
    /// Range ID
    pub range_id: RangeId,
    /// The range as issued
    pub range: DownloadRange,
    /// How it ended
    #[serde(flatten)]
    pub state: RangeState,
}

/// Summary of a pipeline run that reached the merge.
///
/// Serializes to JSON so an external orchestrator can re-run only the failed
/// ranges with [`resumable_ranges`](Self::resumable_ranges).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Every range of the run, by ID
    pub ranges: Vec<RangeReport>,
    /// Sort stage counters
    pub sort: SortStats,
    /// Merge counters
    pub merge: MergeStats,
    /// Flat file that was written
    pub output: PathBuf,
    /// Whether fatal ranges still count as success
    pub tolerate_partial: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the flat file was complete
    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    /// IDs of ranges that failed on their own
    pub fn failed_ranges(&self) -> Vec<RangeId> {
        self.ranges
            .iter()
            .filter(|r| matches!(r.state, RangeState::FailedFatal { .. }))
            .map(|r| r.range_id)
            .collect()
    }

    /// Whether every range completed
    pub fn is_complete(&self) -> bool {
        self.ranges
            .iter()
            .all(|r| matches!(r.state, RangeState::Completed { .. }))
    }

    /// Process exit code: 1 when a range failed fatally and partial results
    /// are not tolerated, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        if !self.tolerate_partial && !self.failed_ranges().is_empty() {
            1
        } else {
            0
        }
    }

    /// `Err(Error::Incomplete)` when [`exit_code`](Self::exit_code) is non-zero
    pub fn into_result(self) -> Result<Self> {
        let failed = self.failed_ranges();
        if !self.tolerate_partial && !failed.is_empty() {
            return Err(Error::Incomplete { failed });
        }
        Ok(self)
    }

    /// Ranges to run again to pick up what this run missed, resumed from
    /// their checkpoints
    pub fn resumable_ranges(&self) -> Vec<DownloadRange> {
        self.ranges
            .iter()
            .filter_map(|r| remaining_range(&r.range, &r.state))
            .collect()
    }

    /// Total nodes enqueued by completed ranges
    pub fn documents(&self) -> u64 {
        self.ranges
            .iter()
            .map(|r| match r.state {
                RangeState::Completed { documents } => documents,
                _ => 0,
            })
            .sum()
    }
}
