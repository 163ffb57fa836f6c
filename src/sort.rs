//! Sort/spill stage.
//!
//! Buffers [`RunRecord`]s from the download queue, and whenever the buffer's
//! estimated size passes the threshold sorts it, collapses duplicate paths
//! and writes it to disk as a [`SortedRun`]. What is left at the end becomes a
//! final in-memory run. The merge stage combines all runs into the flat file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::config::SortConfig;
use crate::error::{CodecError, Error, Result};
use crate::types::{Event, NodeData, NodeProperty, PropertyValue, RunRecord, ValueType};

/// Hidden trailing property carrying a spilled record's modification time
pub const MODIFIED_PROPERTY: &str = ":flatfile:modified";

/// A path-ordered, duplicate-free sequence of records
#[derive(Debug)]
pub enum SortedRun {
    /// Held in memory
    InMemory(Vec<RunRecord>),
    /// Written to a spill file
    Spilled {
        /// Spill file
        path: PathBuf,
        /// Records in the file
        records: u64,
    },
}

impl SortedRun {
    /// Number of records in the run
    pub fn len(&self) -> u64 {
        match self {
            SortedRun::InMemory(records) => records.len() as u64,
            SortedRun::Spilled { records, .. } => *records,
        }
    }

    /// Whether the run holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spill file, if the run lives on disk
    pub fn path(&self) -> Option<&Path> {
        match self {
            SortedRun::InMemory(_) => None,
            SortedRun::Spilled { path, .. } => Some(path),
        }
    }

    /// Drop the run, deleting its spill file
    pub fn discard(self) {
        if let SortedRun::Spilled { path, .. } = self {
            remove_spill(&path);
        }
    }
}

/// Counters kept by the sort stage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortStats {
    /// Records accepted from the queue
    pub records: u64,
    /// Records dropped because a later version of the same path was seen
    pub duplicates: u64,
    /// Runs written to disk
    pub spills: u64,
}

/// Result of a finished sort stage
#[derive(Debug)]
pub struct SortOutput {
    /// Runs in creation order; spilled runs first, the in-memory remainder last
    pub runs: Vec<SortedRun>,
    /// Counters
    pub stats: SortStats,
}

/// Sorts incoming records into bounded-size runs
pub struct SortSpillStage {
    buffer: Vec<RunRecord>,
    buffered_bytes: usize,
    threshold: usize,
    spill_dir: PathBuf,
    compress: bool,
    zstd_level: i32,
    runs: Vec<SortedRun>,
    stats: SortStats,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl SortSpillStage {
    /// Create a stage that spills into `spill_dir` (which must exist)
    pub fn new(config: &SortConfig, spill_dir: impl Into<PathBuf>) -> Self {
        Self {
            buffer: Vec::new(),
            buffered_bytes: 0,
            threshold: config.spill_threshold_bytes,
            spill_dir: spill_dir.into(),
            compress: config.compress_spills,
            zstd_level: 3,
            runs: Vec::new(),
            stats: SortStats::default(),
            event_tx: None,
        }
    }

    /// zstd level for compressed spills
    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    /// Emit [`Event::RunSpilled`] on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Counters so far
    pub fn stats(&self) -> SortStats {
        self.stats
    }

    /// Buffer one record, spilling if the buffer is over the threshold
    pub async fn accept(&mut self, record: RunRecord) -> Result<()> {
        self.buffered_bytes += record.node.estimated_size();
        self.buffer.push(record);
        self.stats.records += 1;
        if self.buffered_bytes >= self.threshold {
            self.spill().await?;
        }
        Ok(())
    }

    /// Sort the buffer and write it out as a run
    pub async fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;

        let index = self.stats.spills;
        let name = if self.compress {
            format!("run-{index:05}.bin.{}", codec::ZSTD_EXTENSION)
        } else {
            format!("run-{index:05}.bin")
        };
        let path = self.spill_dir.join(name);
        let level = self.zstd_level;
        let target = path.clone();
        let (written, duplicates) =
            tokio::task::spawn_blocking(move || -> Result<(u64, u64)> {
                let (sorted, duplicates) = sort_and_dedup(records);
                let written = write_run(&target, sorted, level)?;
                Ok((written, duplicates))
            })
            .await
            .map_err(|e| Error::Other(format!("spill task failed: {e}")))??;

        self.stats.spills += 1;
        self.stats.duplicates += duplicates;
        tracing::debug!(path = %path.display(), records = written, duplicates, "Spilled sorted run");
        if let Some(tx) = &self.event_tx {
            tx.send(Event::RunSpilled {
                path: path.clone(),
                records: written,
            })
            .ok();
        }
        self.runs.push(SortedRun::Spilled {
            path,
            records: written,
        });
        Ok(())
    }

    /// Sort the remaining buffer into a final in-memory run
    pub fn finish(mut self) -> SortOutput {
        if !self.buffer.is_empty() || self.runs.is_empty() {
            let (sorted, duplicates) = sort_and_dedup(std::mem::take(&mut self.buffer));
            self.stats.duplicates += duplicates;
            self.runs.push(SortedRun::InMemory(sorted));
        }
        tracing::debug!(
            runs = self.runs.len(),
            records = self.stats.records,
            duplicates = self.stats.duplicates,
            "Sort stage finished"
        );
        SortOutput {
            runs: std::mem::take(&mut self.runs),
            stats: self.stats,
        }
    }

    /// Delete every spilled run written so far
    pub fn discard(&mut self) {
        for run in self.runs.drain(..) {
            run.discard();
        }
        self.buffer.clear();
        self.buffered_bytes = 0;
    }

    /// Drain `rx` until every sender is gone, then finish.
    ///
    /// On cancellation or a spill error every spilled run is deleted.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<RunRecord>,
        cancel: CancellationToken,
    ) -> Result<SortOutput> {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Sort stage cancelled");
                    self.discard();
                    return Err(Error::Cancelled);
                }
                received = rx.recv() => received,
            };
            let Some(record) = received else {
                break;
            };
            if let Err(e) = self.accept(record).await {
                tracing::error!(error = %e, "Sort stage failed");
                self.discard();
                return Err(e);
            }
        }

        tokio::task::spawn_blocking(move || self.finish())
            .await
            .map_err(|e| Error::Other(format!("sort task failed: {e}")))
    }
}

/// Sort by path and collapse equal paths.
///
/// The record with the later modification time survives; on equal times the
/// first one observed does. Returns the surviving records and the number dropped.
pub fn sort_and_dedup(mut records: Vec<RunRecord>) -> (Vec<RunRecord>, u64) {
    // stable: equal (path, modified) keep insertion order
    records.sort_by(|a, b| {
        a.node
            .path_cmp(&b.node)
            .then_with(|| b.modified.cmp(&a.modified))
    });
    let before = records.len();
    records.dedup_by(|dropped, kept| {
        let same = dropped.node.path == kept.node.path;
        if same {
            tracing::warn!(
                path = %kept.node.path_string(),
                kept_modified = kept.modified,
                dropped_modified = dropped.modified,
                "Duplicate path collapsed"
            );
        }
        same
    });
    let duplicates = (before - records.len()) as u64;
    (records, duplicates)
}

/// Append the hidden modification-time property
pub(crate) fn attach_modified(record: RunRecord) -> NodeData {
    let RunRecord { mut node, modified } = record;
    node.properties.push(NodeProperty::single(
        MODIFIED_PROPERTY,
        ValueType::Long,
        Some(modified.to_string()),
    ));
    node
}

/// Remove the hidden modification-time property written by [`attach_modified`]
pub(crate) fn strip_modified(mut node: NodeData) -> std::result::Result<RunRecord, CodecError> {
    let modified = match node.properties.last() {
        Some(NodeProperty {
            name,
            value: PropertyValue::Single(Some(value)),
            ..
        }) if name == MODIFIED_PROPERTY => value.parse::<i64>().ok(),
        _ => None,
    };
    match modified {
        Some(modified) => {
            node.properties.pop();
            Ok(RunRecord::new(node, modified))
        }
        None => Err(CodecError::MissingRunMetadata {
            path: node.path_string(),
        }),
    }
}

/// Write sorted records to `path`, deleting the partial file on failure
fn write_run(path: &Path, records: Vec<RunRecord>, zstd_level: i32) -> Result<u64> {
    let result = (|| -> std::result::Result<u64, CodecError> {
        let mut writer = codec::create_file(path, zstd_level)?;
        for record in records {
            writer.write_node(&attach_modified(record))?;
        }
        writer.close()
    })();
    if result.is_err() {
        remove_spill(path);
    }
    Ok(result?)
}

fn remove_spill(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed spill file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove spill file"),
    }
}
