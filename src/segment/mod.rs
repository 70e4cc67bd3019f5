//! Narrow view of the segments whose primary keys the manager tracks.

pub mod memory;

pub use memory::MemorySegment;

use crate::comparison::{ComparableValue, ComparisonColumns};
use crate::primary_key::PrimaryKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Shared segment name. Index locations compare it by `Arc` instance, not by text, so every
/// loaded segment needs its own allocation.
pub type SegmentId = Arc<str>;

/// Storage flavour of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Sealed, fully built segment. The only kind accepted by segment-level operations.
    Immutable,
    /// Consuming segment still receiving records.
    Mutable,
    /// Placeholder for a segment without documents.
    Empty,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SegmentKind::Immutable => "immutable",
            SegmentKind::Mutable => "mutable",
            SegmentKind::Empty => "empty",
        })
    }
}

/// Column-level statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMetadata {
    pub max_value: Option<ComparableValue>,
}

/// Segment-level statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentMetadata {
    total_docs: u32,
    columns: HashMap<String, ColumnMetadata>,
}

impl SegmentMetadata {
    pub fn new(total_docs: u32) -> Self {
        Self {
            total_docs,
            columns: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column: ColumnMetadata) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    pub fn total_docs(&self) -> u32 {
        self.total_docs
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.get(name)
    }
}

/// Per-record descriptor streamed out of a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInfo {
    pub primary_key: PrimaryKey,
    pub doc_id: u32,
    pub comparison: ComparisonColumns,
}

impl RecordInfo {
    pub fn new(primary_key: PrimaryKey, doc_id: u32, comparison: ComparisonColumns) -> Self {
        Self {
            primary_key,
            doc_id,
            comparison,
        }
    }
}

/// Columns a reader must materialize for each record.
#[derive(Debug, Clone, Copy)]
pub struct RecordReaderSpec<'a> {
    pub primary_key_columns: &'a [String],
    pub comparison_columns: &'a [String],
}

/// Lazy record stream; resources are released when it is dropped.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<RecordInfo, SegmentError>> + 'a>;

/// Capability the manager needs from a segment.
pub trait Segment: Send + Sync {
    fn id(&self) -> &SegmentId;

    fn kind(&self) -> SegmentKind;

    fn metadata(&self) -> &SegmentMetadata;

    fn read_records(&self, spec: RecordReaderSpec<'_>) -> Result<RecordIter<'_>, SegmentError>;

    fn name(&self) -> &str {
        self.id()
    }
}

/// Failures surfaced while reading segment data or metadata.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("failed to read records of segment {segment}: {source}")]
    Io {
        segment: String,
        #[source]
        source: std::io::Error,
    },
    #[error("segment {segment} has no metadata for column '{column}'")]
    MissingColumn { segment: String, column: String },
    #[error("column '{column}' of segment {segment} has no numeric max value")]
    NonNumericMax { segment: String, column: String },
    #[error("segment {segment} doc {doc_id} is malformed: {reason}")]
    Malformed {
        segment: String,
        doc_id: u32,
        reason: String,
    },
}
