//! Error types for flatfile-dl
//!
//! This module provides the error taxonomy for the extraction pipeline:
//! - Range construction errors (rejected before anything runs)
//! - Download errors (transient, exhausted, interrupted, conversion)
//! - Codec errors for malformed or truncated binary streams
//! - Merge integrity violations (internal defects)

use crate::partition::{Checkpoint, DownloadRange};
use crate::types::RangeId;
use thiserror::Error;

/// Result type alias for flatfile-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for flatfile-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "sort.spill_threshold_bytes")
        key: Option<String>,
    },

    /// A range was constructed with inverted modification-time bounds
    #[error("invalid range ({from}, {to}): upper bound is below lower bound")]
    InvalidRange {
        /// Inclusive lower bound
        from: i64,
        /// Exclusive upper bound
        to: i64,
    },

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Malformed or incomplete binary data
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The merged output stopped being strictly path-ordered
    #[error("merge integrity violation: {next} emitted after {previous}")]
    MergeIntegrity {
        /// Path emitted before the violation
        previous: String,
        /// Path that was not strictly greater
        next: String,
    },

    /// Some ranges failed fatally and partial results were not tolerated
    #[error("extraction incomplete: {} range(s) failed", failed.len())]
    Incomplete {
        /// Ranges that ended in a fatal state
        failed: Vec<RangeId>,
    },

    /// The pipeline was cancelled (explicitly, by a deadline, or by a signal)
    #[error("pipeline cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network or database hiccup; retried in place
    #[error("transient source error: {message}")]
    Transient {
        /// Description of the failure
        message: String,
    },

    /// Permanent source failure (bad query, authorization, ...)
    #[error("source error: {message}")]
    Source {
        /// Description of the failure
        message: String,
    },

    /// A raw document could not be turned into a node
    #[error("cannot convert document {id}: {reason}")]
    Conversion {
        /// Document ID
        id: String,
        /// Why conversion failed
        reason: String,
    },

    /// Retries exhausted (or a non-retryable error); the range can be resumed from `checkpoint`
    #[error("download of {range} failed after {attempts} attempt(s): {reason}")]
    Failed {
        /// The range as originally issued
        range: DownloadRange,
        /// Last successfully enqueued document, if any
        checkpoint: Option<Checkpoint>,
        /// Number of scan attempts made
        attempts: u32,
        /// The last underlying error
        reason: String,
    },

    /// The range was stopped by cancellation before it finished
    #[error("download interrupted")]
    Interrupted {
        /// Last successfully enqueued document, if any
        checkpoint: Option<Checkpoint>,
    },
}

impl DownloadError {
    /// Shorthand for a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        DownloadError::Transient {
            message: message.into(),
        }
    }

    /// Checkpoint carried by a terminal range error
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            DownloadError::Failed { checkpoint, .. } | DownloadError::Interrupted { checkpoint } => {
                checkpoint.as_ref()
            }
            _ => None,
        }
    }
}

/// Binary stream errors; always fatal for the stream being read
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input ended before a declared length or before the end-of-stream marker
    #[error("truncated stream while reading {context}")]
    Truncated {
        /// What was being read
        context: &'static str,
    },

    /// A varint used more than five bytes
    #[error("malformed varint")]
    MalformedVarint,

    /// A negative length or count other than the null sentinel
    #[error("invalid length {0}")]
    InvalidLength(i32),

    /// String bytes were not UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Unknown property type ordinal
    #[error("unknown value type {0}")]
    UnknownValueType(u8),

    /// Multi-valued flag was neither 0 nor 1
    #[error("invalid multi-valued flag {0}")]
    InvalidMultiValueFlag(u8),

    /// Null sentinel found where a path element is required
    #[error("null path element")]
    NullPathElement,

    /// Null sentinel found where a property name is required
    #[error("null property name")]
    NullPropertyName,

    /// A value that cannot be represented in the wire format
    #[error("value too large to encode: {0} bytes")]
    TooLarge(usize),

    /// A spilled run record lacks its modification-time property
    #[error("run record {path} has no modification time")]
    MissingRunMetadata {
        /// Path of the offending record
        path: String,
    },

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::Truncated { context: "data" }
        } else {
            CodecError::Io(e)
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_eof_maps_to_truncated() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err = CodecError::from(io);
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn other_io_errors_stay_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = CodecError::from(io);
        assert!(matches!(err, CodecError::Io(_)));
    }

    #[test]
    fn invalid_range_message_names_bounds() {
        let err = Error::InvalidRange { from: 10, to: 5 };
        assert_eq!(
            err.to_string(),
            "invalid range (10, 5): upper bound is below lower bound"
        );
    }

    #[test]
    fn incomplete_counts_failed_ranges() {
        let err = Error::Incomplete {
            failed: vec![RangeId(0), RangeId(3)],
        };
        assert_eq!(err.to_string(), "extraction incomplete: 2 range(s) failed");
    }

    #[test]
    fn interrupted_exposes_checkpoint() {
        let cp = Checkpoint {
            modified: 7,
            id: "1:/a".to_string(),
        };
        let err = DownloadError::Interrupted {
            checkpoint: Some(cp.clone()),
        };
        assert_eq!(err.checkpoint(), Some(&cp));
        assert!(DownloadError::transient("x").checkpoint().is_none());
    }

    #[test]
    fn config_helper_sets_key() {
        match Error::config("pipeline.queue_capacity", "must be at least 1") {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("pipeline.queue_capacity"));
                assert_eq!(message, "must be at least 1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
