use crate::comparison::ComparisonError;
use crate::config::ConfigError;
use crate::index::IndexError;
use crate::lifecycle::LifecycleError;
use crate::segment::{SegmentError, SegmentKind};
use crate::watermark::WatermarkError;
use thiserror::Error;

/// Umbrella error returned by [`crate::PartitionMetadataManager`].
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("got unsupported {kind} segment {segment} for table {table}")]
    UnsupportedSegment {
        segment: String,
        kind: SegmentKind,
        table: String,
    },
    #[error(transparent)]
    Comparison(#[from] ComparisonError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Watermark(#[from] WatermarkError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// Failure inside a segment operation, tagged with where it happened.
    #[error("caught error while {action} segment {segment} of table {table} in {manager}: {source}")]
    SegmentOperation {
        action: &'static str,
        segment: String,
        table: String,
        manager: &'static str,
        #[source]
        source: Box<MetadataError>,
    },
}

impl MetadataError {
    /// Innermost error, skipping operation context.
    pub fn root(&self) -> &MetadataError {
        match self {
            MetadataError::SegmentOperation { source, .. } => source.root(),
            other => other,
        }
    }
}
