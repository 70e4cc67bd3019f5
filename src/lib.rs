//! Per-partition primary-key metadata for upsert and dedup tables.

pub mod comparison;
pub mod config;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod manager;
pub mod metrics;
pub mod primary_key;
pub mod segment;
pub mod watermark;

pub use comparison::{
    decide, decide_sealed, ComparableValue, ComparisonColumns, ComparisonError, ComparisonMode,
    ComparisonValue, Decision, SealedValues, ValueType,
};
pub use config::{ConfigError, MetadataConfig, MetadataMode};
pub use error::MetadataError;
pub use index::{
    resolve, ConcurrentMapIndex, IndexEntry, IndexError, IndexOutcome, IndexUpdate, OrderedIndex,
    PrimaryKeyIndex, RecordLocation, Resolution, UpdateContext,
};
pub use lifecycle::{CloseStatus, LifecycleError, LifecycleState, OperationGate, OperationPermit};
pub use manager::{
    AppliedCounts, ManagerBuilder, PartitionMetadataManager, RecordOutcome, SegmentOutcome,
    SkipReason, SweepOutcome,
};
pub use metrics::{
    primary_keys_gauge, remove_expired_timer, InMemoryMetrics, MetricsSink, NoopMetrics,
    DEDUP_PRIMARY_KEYS_COUNT, DEDUP_REMOVE_EXPIRED_PRIMARY_KEYS_TIME_MS,
    UPSERT_PRIMARY_KEYS_COUNT, UPSERT_REMOVE_EXPIRED_PRIMARY_KEYS_TIME_MS,
};
pub use primary_key::{HashFunction, HashedPrimaryKey, KeyValue, PrimaryKey};
pub use segment::{
    ColumnMetadata, MemorySegment, RecordInfo, RecordIter, RecordReaderSpec, Segment,
    SegmentError, SegmentId, SegmentKind, SegmentMetadata,
};
pub use watermark::{
    watermark_file_path, FileWatermarkStore, MemoryWatermarkStore, Watermark, WatermarkError,
    WatermarkStore, TTL_WATERMARK_NOT_SET, TTL_WATERMARK_TABLE_PARTITION,
};
