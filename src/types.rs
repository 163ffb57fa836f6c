//! Core types for flatfile-dl

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

use crate::error::CodecError;
use crate::partition::{Checkpoint, DownloadRange};

/// Identifier of a range within one pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeId(pub usize);

impl std::fmt::Display for RangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Property type, stored on the wire as its ordinal byte
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Unknown or null-only value
    #[default]
    Undefined = 0,
    /// UTF-8 string
    String = 1,
    /// Binary reference (blob ID)
    Binary = 2,
    /// 64-bit integer
    Long = 3,
    /// 64-bit float
    Double = 4,
    /// ISO-8601 timestamp
    Date = 5,
    /// true/false
    Boolean = 6,
    /// Qualified name
    Name = 7,
    /// Repository path
    Path = 8,
    /// Hard reference (UUID)
    Reference = 9,
    /// Weak reference (UUID)
    WeakReference = 10,
    /// URI
    Uri = 11,
    /// Arbitrary-precision decimal
    Decimal = 12,
}

impl ValueType {
    /// Wire ordinal
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Look up a type by its wire ordinal
    pub fn from_ordinal(ordinal: u8) -> Result<Self, CodecError> {
        Ok(match ordinal {
            0 => ValueType::Undefined,
            1 => ValueType::String,
            2 => ValueType::Binary,
            3 => ValueType::Long,
            4 => ValueType::Double,
            5 => ValueType::Date,
            6 => ValueType::Boolean,
            7 => ValueType::Name,
            8 => ValueType::Path,
            9 => ValueType::Reference,
            10 => ValueType::WeakReference,
            11 => ValueType::Uri,
            12 => ValueType::Decimal,
            other => return Err(CodecError::UnknownValueType(other)),
        })
    }
}

/// Value(s) of a property
///
/// `Single(None)` is a null value and is distinct from `Multi(vec![])`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    /// Exactly one (possibly null) value
    Single(Option<String>),
    /// Zero or more values
    Multi(Vec<Option<String>>),
}

/// A named, typed property of a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProperty {
    /// Property name
    pub name: String,
    /// Property type
    pub value_type: ValueType,
    /// Value(s)
    pub value: PropertyValue,
}

impl NodeProperty {
    /// Single-valued property
    pub fn single(name: impl Into<String>, value_type: ValueType, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value_type,
            value: PropertyValue::Single(value),
        }
    }

    /// Multi-valued property
    pub fn multi(name: impl Into<String>, value_type: ValueType, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            value_type,
            value: PropertyValue::Multi(values),
        }
    }

    /// Whether the property holds a sequence of values
    pub fn is_multi_valued(&self) -> bool {
        matches!(self.value, PropertyValue::Multi(_))
    }

    /// Values as a slice (length 1 for single-valued properties)
    pub fn values(&self) -> &[Option<String>] {
        match &self.value {
            PropertyValue::Single(v) => std::slice::from_ref(v),
            PropertyValue::Multi(vs) => vs,
        }
    }
}

/// Canonical node record: hierarchical path plus properties
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    /// Path segments, root to leaf; empty for the root node
    pub path: Vec<String>,
    /// Properties in emission order
    pub properties: Vec<NodeProperty>,
}

/// Rough per-allocation overhead used when estimating buffer size
const STRING_OVERHEAD: usize = std::mem::size_of::<String>();
const PROPERTY_OVERHEAD: usize = std::mem::size_of::<NodeProperty>();

impl NodeData {
    /// Create a node from a path and its properties
    pub fn new(path: Vec<String>, properties: Vec<NodeProperty>) -> Self {
        Self { path, properties }
    }

    /// Canonical path order: element by element, a prefix sorts first
    pub fn path_cmp(&self, other: &NodeData) -> Ordering {
        self.path.cmp(&other.path)
    }

    /// Absolute path string (`/` for the root)
    pub fn path_string(&self) -> String {
        if self.path.is_empty() {
            "/".to_string()
        } else {
            let mut s = String::new();
            for element in &self.path {
                s.push('/');
                s.push_str(element);
            }
            s
        }
    }

    /// Estimated heap footprint, used to decide when to spill
    pub fn estimated_size(&self) -> usize {
        let path: usize = self.path.iter().map(|e| e.len() + STRING_OVERHEAD).sum();
        let props: usize = self
            .properties
            .iter()
            .map(|p| {
                PROPERTY_OVERHEAD
                    + p.name.len()
                    + p.values()
                        .iter()
                        .map(|v| v.as_ref().map_or(0, String::len) + STRING_OVERHEAD)
                        .sum::<usize>()
            })
            .sum();
        std::mem::size_of::<NodeData>() + path + props
    }
}

/// A node together with the modification time of its source document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRecord {
    /// The converted node
    pub node: NodeData,
    /// Source document modification time (seconds)
    pub modified: i64,
}

impl RunRecord {
    /// Create a record
    pub fn new(node: NodeData, modified: i64) -> Self {
        Self { node, modified }
    }

    /// Whether `self` replaces `other` when both carry the same path
    pub fn supersedes(&self, other: &RunRecord) -> bool {
        self.modified > other.modified
    }
}

/// Event emitted during a pipeline run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A worker picked up a range
    RangeStarted {
        /// Range ID
        range_id: RangeId,
        /// The range being scanned
        range: DownloadRange,
    },

    /// Periodic document counter for a range
    Progress {
        /// Range ID
        range_id: RangeId,
        /// Documents processed so far
        documents: u64,
    },

    /// A range scan failed transiently and will be resumed from its checkpoint
    RangeRetrying {
        /// Range ID
        range_id: RangeId,
        /// Attempt number (1-based) about to start
        attempt: u32,
        /// Where the retry resumes
        #[serde(skip_serializing_if = "Option::is_none")]
        checkpoint: Option<Checkpoint>,
    },

    /// A range finished
    RangeCompleted {
        /// Range ID
        range_id: RangeId,
        /// Documents processed
        documents: u64,
    },

    /// A range stopped without finishing
    RangeFailed {
        /// Range ID
        range_id: RangeId,
        /// Error message
        error: String,
        /// Whether the range was interrupted rather than failing on its own
        interrupted: bool,
    },

    /// The sort stage wrote a run to disk
    RunSpilled {
        /// Spill file
        path: PathBuf,
        /// Records in the run
        records: u64,
    },

    /// The merge started
    MergeStarted {
        /// Number of sorted runs
        runs: usize,
    },

    /// The flat file is complete
    MergeComplete {
        /// Records written
        records: u64,
        /// Superseded duplicates discarded during the merge
        duplicates: u64,
    },

    /// The pipeline was cancelled
    Cancelled,
}
