//! Range download: scan, convert, enqueue.
//!
//! - [`convert`] - Raw document to [`NodeData`](crate::types::NodeData)
//! - [`worker`] - Per-range scan loop with checkpointed retry
//! - `progress` - Periodic per-range progress reports

pub mod convert;
mod progress;
pub mod worker;


pub use convert::to_node_data;
pub use worker::{DownloadWorker, RangeSummary, WorkerParams};
