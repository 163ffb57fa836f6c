//! k-way merge of sorted runs into the flat file.
//!
//! One cursor per run feeds a min-heap keyed on `(path, run index)`. Heads
//! sharing a path are collapsed with the same later-modification-wins rule
//! the sort stage uses, and the emitted sequence is checked to be strictly
//! increasing. Spill files are deleted as soon as their cursor is exhausted.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::codec::{self, FileSource, NodeStreamReader, NodeStreamWriter};
use crate::error::{Error, Result};
use crate::sort::{SortedRun, strip_modified};
use crate::types::{NodeData, RunRecord};

/// How many records are merged between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Counters from a completed merge
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Records written
    pub records: u64,
    /// Superseded records discarded across runs
    pub duplicates: u64,
    /// Runs merged
    pub runs: usize,
}

/// Pull-based cursor over one run
enum RunCursor {
    Memory(std::vec::IntoIter<RunRecord>),
    File {
        reader: NodeStreamReader<FileSource>,
        path: PathBuf,
        exhausted: bool,
    },
}

impl RunCursor {
    fn open(run: SortedRun) -> Result<Self> {
        Ok(match run {
            SortedRun::InMemory(records) => RunCursor::Memory(records.into_iter()),
            SortedRun::Spilled { path, .. } => {
                let reader = match codec::open_file(&path) {
                    Ok(reader) => reader,
                    Err(e) => {
                        remove_run_file(&path);
                        return Err(e.into());
                    }
                };
                RunCursor::File {
                    reader,
                    path,
                    exhausted: false,
                }
            }
        })
    }

    fn next(&mut self) -> Result<Option<RunRecord>> {
        match self {
            RunCursor::Memory(records) => Ok(records.next()),
            RunCursor::File {
                reader,
                path,
                exhausted,
            } => {
                if *exhausted {
                    return Ok(None);
                }
                match reader.read_node()? {
                    Some(node) => Ok(Some(strip_modified(node)?)),
                    None => {
                        *exhausted = true;
                        remove_run_file(path);
                        Ok(None)
                    }
                }
            }
        }
    }
}

impl Drop for RunCursor {
    fn drop(&mut self) {
        // error or cancellation before exhaustion
        if let RunCursor::File {
            path,
            exhausted: false,
            ..
        } = self
        {
            remove_run_file(path);
        }
    }
}

fn remove_run_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed merged run"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove run file"),
    }
}

/// Current head of one run
struct HeadEntry {
    record: RunRecord,
    run: usize,
}

impl PartialEq for HeadEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeadEntry {}

impl PartialOrd for HeadEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeadEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record
            .node
            .path_cmp(&other.record.node)
            .then(self.run.cmp(&other.run))
    }
}

/// Merge `runs` into `writer`, consuming them.
///
/// Does not write the end-of-stream sentinel; call
/// [`NodeStreamWriter::finish`] afterwards.
pub fn merge_runs<W: Write>(
    runs: Vec<SortedRun>,
    writer: &mut NodeStreamWriter<W>,
    cancel: &CancellationToken,
) -> Result<MergeStats> {
    let run_count = runs.len();
    // open every cursor first so a failure still drops (and deletes) the rest
    let mut cursors = Vec::with_capacity(run_count);
    let mut open_error = None;
    for run in runs {
        if open_error.is_some() {
            run.discard();
            continue;
        }
        match RunCursor::open(run) {
            Ok(cursor) => cursors.push(cursor),
            Err(e) => open_error = Some(e),
        }
    }
    if let Some(e) = open_error {
        return Err(e);
    }

    let mut heap = BinaryHeap::with_capacity(cursors.len());
    for (run, cursor) in cursors.iter_mut().enumerate() {
        if let Some(record) = cursor.next()? {
            heap.push(Reverse(HeadEntry { record, run }));
        }
    }

    let mut stats = MergeStats {
        runs: run_count,
        ..MergeStats::default()
    };
    let mut last_emitted: Option<Vec<String>> = None;
    let mut pending: Option<RunRecord> = None;
    let mut merged = 0u64;

    while let Some(Reverse(HeadEntry { record, run })) = heap.pop() {
        merged += 1;
        if merged % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            tracing::debug!(records = stats.records, "Merge cancelled");
            return Err(Error::Cancelled);
        }

        if let Some(next) = cursors[run].next()? {
            heap.push(Reverse(HeadEntry { record: next, run }));
        }

        pending = match pending.take() {
            Some(current) if current.node.path == record.node.path => {
                stats.duplicates += 1;
                let (kept, dropped) = if record.supersedes(&current) {
                    (record, current)
                } else {
                    (current, record)
                };
                tracing::warn!(
                    path = %kept.node.path_string(),
                    kept_modified = kept.modified,
                    dropped_modified = dropped.modified,
                    "Duplicate path across runs collapsed"
                );
                Some(kept)
            }
            Some(current) => {
                emit(writer, &mut last_emitted, current.node)?;
                stats.records += 1;
                Some(record)
            }
            None => Some(record),
        };
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if let Some(current) = pending {
        emit(writer, &mut last_emitted, current.node)?;
        stats.records += 1;
    }

    Ok(stats)
}

fn emit<W: Write>(
    writer: &mut NodeStreamWriter<W>,
    last_emitted: &mut Option<Vec<String>>,
    node: NodeData,
) -> Result<()> {
    if let Some(previous) = last_emitted.as_ref()
        && *previous >= node.path
    {
        let previous = NodeData::new(previous.clone(), Vec::new()).path_string();
        tracing::error!(previous = %previous, next = %node.path_string(), "Merge output out of order");
        return Err(Error::MergeIntegrity {
            previous,
            next: node.path_string(),
        });
    }
    writer.write_node(&node)?;
    *last_emitted = Some(node.path);
    Ok(())
}

/// Merge `runs` into a new flat file at `path`.
///
/// The file is zstd-framed when `path` ends in `.zst`. On any error,
/// including cancellation, the partial output is removed.
pub fn merge_to_file(
    runs: Vec<SortedRun>,
    path: &Path,
    zstd_level: i32,
    cancel: &CancellationToken,
) -> Result<MergeStats> {
    let result = (|| -> Result<MergeStats> {
        let mut writer = codec::create_file(path, zstd_level)?;
        let stats = merge_runs(runs, &mut writer, cancel)?;
        writer.close()?;
        Ok(stats)
    })();
    match result {
        Ok(stats) => {
            tracing::info!(
                path = %path.display(),
                records = stats.records,
                duplicates = stats.duplicates,
                runs = stats.runs,
                "Flat file written"
            );
            Ok(stats)
        }
        Err(e) => {
            if let Err(remove) = std::fs::remove_file(path)
                && remove.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), error = %remove, "Failed to remove partial output");
            }
            Err(e)
        }
    }
}
