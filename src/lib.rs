//! # flatfile-dl
//!
//! Parallel, resumable extraction of a document store into a single
//! path-ordered binary flat file, for bulk-building search indexes without
//! putting read load on the live database while indexing.
//!
//! ## Design Philosophy
//!
//! flatfile-dl is designed to be:
//! - **Resumable** - Every range carries a checkpoint; failed ranges are re-run from where they stopped
//! - **Memory-bounded** - Records are sorted in bounded runs and spilled to disk, then k-way merged
//! - **Library-first** - The database sits behind the [`DocumentSource`] trait
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use flatfile_dl::{Config, MemoryDocumentSource, Pipeline, RawDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = MemoryDocumentSource::from_documents([
//!         RawDocument::new("1:/content", 1_700_000_000).with_field("title", "Content"),
//!         RawDocument::new("2:/content/a", 1_700_000_100).with_field("title", "A"),
//!     ]);
//!
//!     let mut config = Config::default();
//!     config.output.path = "content.bin.zst".into();
//!
//!     let pipeline = Pipeline::new(config, Arc::new(source))?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = pipeline.run().await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Binary node stream format
pub mod codec;
/// Configuration types
pub mod config;
/// Range download workers
pub mod download;
/// Error types
pub mod error;
/// k-way merge of sorted runs
pub mod merge;
/// Range partitioning
pub mod partition;
/// Pipeline coordinator
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Sort buffer and run spilling
pub mod sort;
/// Document source abstraction
pub mod source;
/// Core types and events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use codec::{NodeStreamReader, NodeStreamWriter};
pub use config::Config;
pub use error::{CodecError, DownloadError, Error, Result};
pub use merge::MergeStats;
pub use partition::{Checkpoint, DownloadRange, RangePartitioner};
pub use pipeline::{Pipeline, PipelineReport, RangeReport, RangeState};
pub use source::{DocumentCursor, DocumentSource, MemoryDocumentSource, RawDocument};
pub use types::{Event, NodeData, NodeProperty, PropertyValue, RangeId, RunRecord, ValueType};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Runs [`Pipeline::run`] and cancels it when a termination signal arrives;
/// the pipeline's own result is returned either way (so
/// [`Error::Cancelled`] after a signal).
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use flatfile_dl::{Config, MemoryDocumentSource, Pipeline, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = Pipeline::new(Config::default(), Arc::new(MemoryDocumentSource::new()))?;
///
///     // Run with automatic signal handling
///     let report = run_with_shutdown(&pipeline).await?;
///     println!("{} records written", report.merge.records);
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(pipeline: &Pipeline) -> Result<PipelineReport> {
    let run = pipeline.run();
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            pipeline.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, stopping extraction");
                }
                _ = sigint.recv() => {
                    tracing::info!("SIGINT received, stopping extraction");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("SIGINT received, stopping extraction");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("SIGTERM received, stopping extraction");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Ctrl+C received, stopping extraction");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
