use super::{
    ColumnMetadata, RecordInfo, RecordIter, RecordReaderSpec, Segment, SegmentError, SegmentId,
    SegmentKind, SegmentMetadata,
};
use crate::comparison::ComparableValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

/// Segment held entirely in memory. Column max values are derived from the records.
#[derive(Debug, Clone)]
pub struct MemorySegment {
    id: SegmentId,
    kind: SegmentKind,
    metadata: SegmentMetadata,
    records: Vec<RecordInfo>,
    fail_at: Option<usize>,
}

impl MemorySegment {
    /// Sealed segment holding `records`.
    pub fn new(name: &str, records: Vec<RecordInfo>) -> Self {
        Self::with_kind(name, SegmentKind::Immutable, records)
    }

    pub fn empty(name: &str) -> Self {
        Self::with_kind(name, SegmentKind::Empty, Vec::new())
    }

    pub fn mutable(name: &str, records: Vec<RecordInfo>) -> Self {
        Self::with_kind(name, SegmentKind::Mutable, records)
    }

    pub fn with_kind(name: &str, kind: SegmentKind, records: Vec<RecordInfo>) -> Self {
        let metadata = derive_metadata(&records);
        Self {
            id: Arc::from(name),
            kind,
            metadata,
            records,
            fail_at: None,
        }
    }

    /// Replaces the derived metadata, e.g. to simulate stale statistics.
    pub fn with_metadata(mut self, metadata: SegmentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Makes the record stream fail with an I/O error at position `idx`.
    pub fn with_read_error_at(mut self, idx: usize) -> Self {
        self.fail_at = Some(idx);
        self
    }

    pub fn records(&self) -> &[RecordInfo] {
        &self.records
    }
}

impl Segment for MemorySegment {
    fn id(&self) -> &SegmentId {
        &self.id
    }

    fn kind(&self) -> SegmentKind {
        self.kind
    }

    fn metadata(&self) -> &SegmentMetadata {
        &self.metadata
    }

    fn read_records(&self, _spec: RecordReaderSpec<'_>) -> Result<RecordIter<'_>, SegmentError> {
        let fail_at = self.fail_at;
        let segment = self.id.to_string();
        Ok(Box::new(self.records.iter().enumerate().map(
            move |(idx, record)| {
                if fail_at == Some(idx) {
                    return Err(SegmentError::Io {
                        segment: segment.clone(),
                        source: io::Error::new(io::ErrorKind::UnexpectedEof, "truncated column"),
                    });
                }
                Ok(record.clone())
            },
        )))
    }
}

fn derive_metadata(records: &[RecordInfo]) -> SegmentMetadata {
    let mut maxima: BTreeMap<String, ComparableValue> = BTreeMap::new();
    for record in records {
        for (name, value) in record.comparison.iter() {
            let Some(value) = value.value() else {
                continue;
            };
            match maxima.get(name) {
                Some(current) if value.try_cmp(current) != Some(Ordering::Greater) => {}
                _ => {
                    maxima.insert(name.to_string(), value.clone());
                }
            }
        }
    }
    maxima.into_iter().fold(
        SegmentMetadata::new(records.len() as u32),
        |metadata, (name, max)| {
            metadata.with_column(
                name,
                ColumnMetadata {
                    max_value: Some(max),
                },
            )
        },
    )
}
