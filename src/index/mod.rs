//! Primary-key index contract and the resolution rule every backend applies.
//!
//! Backends own storage and per-key atomicity; `resolve` owns the semantics so that every
//! backend answers inserted / superseded / rejected identically.

pub mod concurrent;
pub mod ordered;

pub use concurrent::ConcurrentMapIndex;
pub use ordered::OrderedIndex;

use crate::comparison::{self, ComparisonColumns, ComparisonError, ComparisonMode, Decision};
use crate::config::MetadataMode;
use crate::primary_key::HashedPrimaryKey;
use crate::segment::SegmentId;
use crate::watermark::TTL_WATERMARK_NOT_SET;
use std::sync::Arc;
use thiserror::Error;

/// Where the current record of a key lives.
///
/// Segments are compared by instance, not by name: a segment reloaded under the same name
/// owns none of the locations of the instance it replaces.
#[derive(Debug, Clone)]
pub struct RecordLocation {
    pub segment: SegmentId,
    pub doc_id: u32,
}

impl RecordLocation {
    pub fn new(segment: SegmentId, doc_id: u32) -> Self {
        Self { segment, doc_id }
    }

    pub fn is_in(&self, segment: &SegmentId) -> bool {
        Arc::ptr_eq(&self.segment, segment)
    }
}

impl PartialEq for RecordLocation {
    fn eq(&self, other: &Self) -> bool {
        self.doc_id == other.doc_id && self.is_in(&other.segment)
    }
}

impl Eq for RecordLocation {}

/// Stored state of one primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub location: RecordLocation,
    pub version: ComparisonColumns,
    /// Comparison time used by TTL sweeps.
    pub time: f64,
}

impl IndexEntry {
    /// Builds an entry whose time is read from `time_column` of `version`; a missing or null
    /// time column yields the unset watermark value.
    pub fn new(
        location: RecordLocation,
        version: ComparisonColumns,
        time_column: Option<&str>,
    ) -> Self {
        let time = time_column
            .and_then(|column| version.time_value(column))
            .unwrap_or(TTL_WATERMARK_NOT_SET);
        Self {
            location,
            version,
            time,
        }
    }

    fn with_version(self, version: ComparisonColumns, time_column: Option<&str>) -> Self {
        Self::new(self.location, version, time_column)
    }
}

/// Result of offering a record to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The key was absent (or only held expired metadata).
    Inserted,
    /// The key existed and now points at the proposed record.
    Superseded,
    /// The stored record was kept.
    Rejected,
}

/// Outcome of one write plus the entry it displaced, used to undo the write.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexUpdate {
    pub outcome: IndexOutcome,
    /// Entry that held the key before the write; `None` for a fresh key or a rejection.
    pub displaced: Option<IndexEntry>,
}

impl IndexUpdate {
    fn applied(outcome: IndexOutcome, displaced: Option<IndexEntry>) -> Self {
        Self { outcome, displaced }
    }

    fn rejected() -> Self {
        Self::applied(IndexOutcome::Rejected, None)
    }
}

/// Policy inputs for a single `add_or_update` call.
#[derive(Debug, Clone, Copy)]
pub struct UpdateContext<'a> {
    pub mode: MetadataMode,
    pub comparison: ComparisonMode,
    pub comparison_columns: &'a [String],
    pub time_column: Option<&'a str>,
    /// Segment being replaced; entries still owned by it yield to the proposed record.
    pub replacing: Option<&'a SegmentId>,
    /// Entries with a time below this floor are treated as absent.
    pub ttl_floor: Option<f64>,
}

impl UpdateContext<'_> {
    pub fn is_stale(&self, entry: &IndexEntry) -> bool {
        self.ttl_floor.is_some_and(|floor| entry.time < floor)
    }

    fn owned_by_replaced(&self, entry: &IndexEntry) -> bool {
        self.replacing
            .is_some_and(|segment| entry.location.is_in(segment))
    }
}

/// What a backend must do for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Insert(IndexEntry),
    Supersede(IndexEntry),
    Reject,
}

impl Resolution {
    pub fn outcome(&self) -> IndexOutcome {
        match self {
            Resolution::Insert(_) => IndexOutcome::Inserted,
            Resolution::Supersede(_) => IndexOutcome::Superseded,
            Resolution::Reject => IndexOutcome::Rejected,
        }
    }
}

/// Decides what happens to a key given its current entry and a proposed record.
pub fn resolve(
    existing: Option<&IndexEntry>,
    proposed: IndexEntry,
    ctx: &UpdateContext<'_>,
) -> Result<Resolution, ComparisonError> {
    let existing = match existing {
        Some(entry) if !ctx.is_stale(entry) => entry,
        _ => return Ok(Resolution::Insert(proposed)),
    };
    let owned_by_replaced = ctx.owned_by_replaced(existing);
    match ctx.mode {
        MetadataMode::Dedup if owned_by_replaced => Ok(Resolution::Supersede(proposed)),
        MetadataMode::Dedup => Ok(Resolution::Reject),
        MetadataMode::Upsert if owned_by_replaced => Ok(Resolution::Supersede(proposed)),
        MetadataMode::Upsert => {
            match comparison::decide(
                ctx.comparison,
                &proposed.version,
                &existing.version,
                ctx.comparison_columns,
            )? {
                Decision::Supersede(version) => Ok(Resolution::Supersede(
                    proposed.with_version(version, ctx.time_column),
                )),
                Decision::Reject => Ok(Resolution::Reject),
            }
        }
    }
}

/// Storage backend holding one partition's primary keys.
///
/// Implementations must make `add_or_update` atomic per key: the read of the current entry,
/// the call to [`resolve`] and the write must not interleave with another update of the same key.
pub trait PrimaryKeyIndex: Send + Sync {
    fn apply(
        &self,
        key: HashedPrimaryKey,
        proposed: IndexEntry,
        ctx: &UpdateContext<'_>,
    ) -> Result<IndexUpdate, IndexError>;

    fn add_or_update(
        &self,
        key: HashedPrimaryKey,
        proposed: IndexEntry,
        ctx: &UpdateContext<'_>,
    ) -> Result<IndexOutcome, IndexError> {
        self.apply(key, proposed, ctx).map(|update| update.outcome)
    }

    /// Puts `previous` back under `key` while the key still points at `written`.
    fn restore(
        &self,
        key: &HashedPrimaryKey,
        written: &RecordLocation,
        previous: Option<IndexEntry>,
    ) -> bool;

    /// Removes `key` only while it still points at `expected`.
    fn remove(&self, key: &HashedPrimaryKey, expected: &RecordLocation) -> bool;

    /// Drops every entry whose time is below `threshold` and returns how many were dropped.
    fn remove_expired_before(&self, threshold: f64) -> usize;

    fn get(&self, key: &HashedPrimaryKey) -> Option<IndexEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases backend resources. Later updates fail with [`IndexError::Closed`].
    fn close(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Errors raised by index backends.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Comparison(#[from] ComparisonError),
    #[error("primary key index is closed")]
    Closed,
    #[error("failed to release primary key index: {reason}")]
    Release { reason: String },
}
