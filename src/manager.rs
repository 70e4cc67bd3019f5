//! Per-partition metadata manager: admission, TTL bookkeeping and index maintenance.

use crate::comparison::ComparisonMode;
use crate::config::{ConfigError, MetadataConfig, MetadataMode};
use crate::error::MetadataError;
use crate::index::{
    ConcurrentMapIndex, IndexEntry, IndexOutcome, PrimaryKeyIndex, RecordLocation, UpdateContext,
};
use crate::primary_key::HashedPrimaryKey;
use crate::lifecycle::{CloseStatus, LifecycleState, OperationGate};
use crate::metrics::{primary_keys_gauge, remove_expired_timer, MetricsSink, NoopMetrics};
use crate::segment::{
    RecordInfo, RecordReaderSpec, Segment, SegmentError, SegmentId, SegmentKind,
};
use crate::watermark::{
    FileWatermarkStore, MemoryWatermarkStore, Watermark, WatermarkStore, TTL_WATERMARK_NOT_SET,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Span};

/// Why an operation left the index untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    EmptySegment,
    /// The manager was stopped before the operation was admitted.
    Stopped,
    /// Every record of the segment is older than the TTL floor.
    OutOfTtl { max_time: f64, floor: f64 },
    TtlDisabled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptySegment => f.write_str("segment is empty"),
            SkipReason::Stopped => f.write_str("metadata manager is already stopped"),
            SkipReason::OutOfTtl { max_time, floor } => {
                write!(f, "max time {max_time} is below the TTL floor {floor}")
            }
            SkipReason::TtlDisabled => f.write_str("metadata TTL is disabled"),
        }
    }
}

/// Per-record tallies of an applied segment operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedCounts {
    pub inserted: usize,
    pub superseded: usize,
    pub rejected: usize,
    pub removed: usize,
}

impl AppliedCounts {
    fn record(&mut self, outcome: IndexOutcome) {
        match outcome {
            IndexOutcome::Inserted => self.inserted += 1,
            IndexOutcome::Superseded => self.superseded += 1,
            IndexOutcome::Rejected => self.rejected += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentOutcome {
    Applied(AppliedCounts),
    Skipped(SkipReason),
}

impl SegmentOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, SegmentOutcome::Skipped(_))
    }

    pub fn applied(&self) -> Option<AppliedCounts> {
        match self {
            SegmentOutcome::Applied(counts) => Some(*counts),
            SegmentOutcome::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordOutcome {
    Indexed(IndexOutcome),
    Skipped(SkipReason),
}

impl RecordOutcome {
    /// Dedup reading of a rejection: the key was already present.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, RecordOutcome::Indexed(IndexOutcome::Rejected))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepOutcome {
    Swept { removed: usize, floor: f64 },
    Skipped(SkipReason),
}

/// Builder for [`PartitionMetadataManager`].
pub struct ManagerBuilder<I> {
    config: MetadataConfig,
    index: I,
    store: Option<Box<dyn WatermarkStore>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl<I: PrimaryKeyIndex> ManagerBuilder<I> {
    /// Swaps the index backend.
    pub fn index<J: PrimaryKeyIndex>(self, index: J) -> ManagerBuilder<J> {
        ManagerBuilder {
            config: self.config,
            index,
            store: self.store,
            metrics: self.metrics,
        }
    }

    /// Defaults to a file store under the table index directory, or memory without one.
    pub fn watermark_store(mut self, store: impl WatermarkStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<PartitionMetadataManager<I>, MetadataError> {
        let config = self.config.validated()?;
        let span = info_span!(
            "partition_metadata",
            table = %config.table_name_with_type,
            partition = config.partition_id,
            mode = %config.mode,
        );
        let store: Box<dyn WatermarkStore> = match (self.store, config.watermark_path()) {
            (Some(store), _) => store,
            (None, Some(path)) => Box::new(FileWatermarkStore::new(path)),
            (None, None) => Box::new(MemoryWatermarkStore::new()),
        };
        let initial = {
            let _entered = span.enter();
            if config.ttl_enabled() {
                store.load(TTL_WATERMARK_NOT_SET).unwrap_or_else(|err| {
                    warn!(error = %err, "failed to load watermark, starting unset");
                    TTL_WATERMARK_NOT_SET
                })
            } else {
                if let Err(err) = store.delete() {
                    warn!(error = %err, "failed to delete watermark of TTL-disabled partition");
                }
                TTL_WATERMARK_NOT_SET
            }
        };
        Ok(PartitionMetadataManager {
            config,
            index: self.index,
            watermark: Watermark::new(initial),
            store,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
            gate: OperationGate::new(),
            span,
        })
    }
}

/// Tracks the primary keys of one table partition across its segments.
///
/// Segment operations run concurrently with each other; per-key consistency comes from the
/// index. `stop` then `close` drains in-flight operations before the index is released.
pub struct PartitionMetadataManager<I: PrimaryKeyIndex = ConcurrentMapIndex> {
    config: MetadataConfig,
    index: I,
    watermark: Watermark,
    store: Box<dyn WatermarkStore>,
    metrics: Arc<dyn MetricsSink>,
    gate: OperationGate,
    span: Span,
}

/// Write made by a segment operation that can be undone.
struct JournalEntry {
    key: HashedPrimaryKey,
    written: RecordLocation,
    displaced: Option<IndexEntry>,
}

impl PartitionMetadataManager<ConcurrentMapIndex> {
    pub fn builder(config: MetadataConfig) -> ManagerBuilder<ConcurrentMapIndex> {
        ManagerBuilder {
            config,
            index: ConcurrentMapIndex::new(),
            store: None,
            metrics: None,
        }
    }

    pub fn new(config: MetadataConfig) -> Result<Self, MetadataError> {
        Self::builder(config).build()
    }
}

impl<I: PrimaryKeyIndex> PartitionMetadataManager<I> {
    pub fn add_segment(&self, segment: &dyn Segment) -> Result<SegmentOutcome, MetadataError> {
        let _entered = self.span.enter();
        let name = segment.name();
        if segment.kind() == SegmentKind::Empty {
            info!(segment = name, "skip adding empty segment");
            return Ok(SegmentOutcome::Skipped(SkipReason::EmptySegment));
        }
        self.ensure_supported(segment)?;
        let Some(_permit) = self.gate.try_begin() else {
            info!(
                segment = name,
                "skip adding segment because metadata manager is already stopped"
            );
            return Ok(SegmentOutcome::Skipped(SkipReason::Stopped));
        };
        self.add_or_replace(None, segment)
            .map_err(|err| self.wrap("adding", name.to_string(), err))
    }

    /// Moves the keys of `old` over to `new`. Keys present only in `old` are dropped unless
    /// another segment claimed them meanwhile.
    pub fn replace_segment(
        &self,
        old: &dyn Segment,
        new: &dyn Segment,
    ) -> Result<SegmentOutcome, MetadataError> {
        let _entered = self.span.enter();
        let label = format!("{} with segment {}", old.name(), new.name());
        if new.kind() == SegmentKind::Empty {
            info!(old = old.name(), new = new.name(), "skip replacing segment with empty segment");
            return Ok(SegmentOutcome::Skipped(SkipReason::EmptySegment));
        }
        self.ensure_supported(new)?;
        let Some(_permit) = self.gate.try_begin() else {
            info!(
                old = old.name(),
                new = new.name(),
                "skip replacing segment because metadata manager is already stopped"
            );
            return Ok(SegmentOutcome::Skipped(SkipReason::Stopped));
        };
        self.add_or_replace(Some(old), new)
            .map_err(|err| self.wrap("replacing", label, err))
    }

    /// Drops the keys still owned by `segment`.
    pub fn remove_segment(&self, segment: &dyn Segment) -> Result<SegmentOutcome, MetadataError> {
        let _entered = self.span.enter();
        let name = segment.name();
        if segment.kind() == SegmentKind::Empty {
            info!(segment = name, "skip removing empty segment");
            return Ok(SegmentOutcome::Skipped(SkipReason::EmptySegment));
        }
        let Some(_permit) = self.gate.try_begin() else {
            info!(
                segment = name,
                "skip removing segment because metadata manager is already stopped"
            );
            return Ok(SegmentOutcome::Skipped(SkipReason::Stopped));
        };
        self.remove_records(segment)
            .map_err(|err| self.wrap("removing", name.to_string(), err))
    }

    /// Evicts every key whose time fell below `watermark - ttl` and persists the watermark.
    pub fn remove_expired_primary_keys(&self) -> Result<SweepOutcome, MetadataError> {
        let _entered = self.span.enter();
        if !self.config.ttl_enabled() {
            return Ok(SweepOutcome::Skipped(SkipReason::TtlDisabled));
        }
        let Some(_permit) = self.gate.try_begin() else {
            info!("skip removing expired primary keys because metadata manager is already stopped");
            return Ok(SweepOutcome::Skipped(SkipReason::Stopped));
        };
        let started = Instant::now();
        let watermark = self.watermark.get();
        let floor = watermark - self.config.metadata_ttl;
        let removed = self.index.remove_expired_before(floor);
        self.store.persist(watermark)?;
        self.metrics.record_timer(
            &self.config.table_name_with_type,
            remove_expired_timer(self.config.mode),
            started.elapsed(),
        );
        self.update_primary_key_gauge();
        debug!(removed, floor, "removed expired primary keys");
        Ok(SweepOutcome::Swept { removed, floor })
    }

    /// Offers one real-time record of the consuming segment `segment`.
    ///
    /// Upsert tables order it with the per-column rule; dedup tables report a rejection as a
    /// duplicate. Records already older than the TTL floor are dropped.
    pub fn ingest_record(
        &self,
        segment: &SegmentId,
        record: RecordInfo,
    ) -> Result<RecordOutcome, MetadataError> {
        let _entered = self.span.enter();
        let Some(_permit) = self.gate.try_begin() else {
            debug!(
                segment = &**segment,
                key = %record.primary_key,
                "skip ingesting record because metadata manager is already stopped"
            );
            return Ok(RecordOutcome::Skipped(SkipReason::Stopped));
        };
        let time_column = self.config.time_column();
        if self.config.ttl_enabled() {
            let time = time_column.and_then(|column| record.comparison.time_value(column));
            if let Some(time) = time {
                self.watermark.observe(time);
                let floor = self.watermark.ttl_floor(self.config.metadata_ttl);
                if time < floor {
                    return Ok(RecordOutcome::Skipped(SkipReason::OutOfTtl {
                        max_time: time,
                        floor,
                    }));
                }
            }
        }
        let key = self.config.hash_function.hash(&record.primary_key);
        let entry = IndexEntry::new(
            RecordLocation::new(Arc::clone(segment), record.doc_id),
            record.comparison,
            time_column,
        );
        let ctx = self.update_context(ComparisonMode::PerColumn, None);
        let outcome = self.index.add_or_update(key, entry, &ctx)?;
        if outcome == IndexOutcome::Rejected && self.config.mode == MetadataMode::Dedup {
            debug!(segment = &**segment, key = %record.primary_key, "duplicate primary key");
        }
        self.update_primary_key_gauge();
        Ok(RecordOutcome::Indexed(outcome))
    }

    /// Stops admitting operations. Repeated calls only log.
    pub fn stop(&self) {
        let _entered = self.span.enter();
        match self.gate.stop() {
            Some(pending) => info!(
                pending,
                primary_keys = self.index.len(),
                "stopped the metadata manager"
            ),
            None => warn!("metadata manager is already stopped"),
        }
    }

    /// Blocks until admitted operations finish, then releases the index.
    pub fn close(&self) -> Result<(), MetadataError> {
        self.close_inner(None)
    }

    /// Like [`close`](Self::close) but gives up after `timeout`; the call can be retried.
    pub fn close_timeout(&self, timeout: Duration) -> Result<(), MetadataError> {
        self.close_inner(Some(timeout))
    }

    pub fn watermark(&self) -> f64 {
        self.watermark.get()
    }

    pub fn num_primary_keys(&self) -> usize {
        self.index.len()
    }

    pub fn state(&self) -> LifecycleState {
        self.gate.state()
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn config(&self) -> &MetadataConfig {
        &self.config
    }

    fn close_inner(&self, timeout: Option<Duration>) -> Result<(), MetadataError> {
        let _entered = self.span.enter();
        match self.gate.close(timeout)? {
            CloseStatus::AlreadyClosed => {
                warn!("metadata manager is already closed");
                Ok(())
            }
            CloseStatus::Drained => {
                info!(primary_keys = self.index.len(), "closing the metadata manager");
                if let Err(err) = self.index.close() {
                    self.gate.reopen_close();
                    return Err(err.into());
                }
                self.set_primary_key_gauge(0);
                info!("closed the metadata manager");
                Ok(())
            }
        }
    }

    fn add_or_replace(
        &self,
        old: Option<&dyn Segment>,
        new: &dyn Segment,
    ) -> Result<SegmentOutcome, MetadataError> {
        if self.config.ttl_enabled() {
            let max_time = self.max_time(new)?;
            self.watermark.observe(max_time);
            if let Some(reason) = self.out_of_ttl(max_time) {
                info!(
                    segment = new.name(),
                    max_time,
                    ttl = self.config.metadata_ttl,
                    replacing = old.is_some(),
                    "skip segment as its max time is out of TTL"
                );
                return Ok(SegmentOutcome::Skipped(reason));
            }
        }
        let records = self.read_all(new)?;
        let old_records = old.map(|segment| self.read_all(segment)).transpose()?;

        let mut counts = AppliedCounts::default();
        let ctx = self.update_context(
            ComparisonMode::SealedAggregate,
            old.map(|segment| segment.id()),
        );
        let time_column = self.config.time_column();
        let mut journal = Vec::with_capacity(records.len());
        for record in records {
            let key = self.config.hash_function.hash(&record.primary_key);
            let written = RecordLocation::new(Arc::clone(new.id()), record.doc_id);
            let entry = IndexEntry::new(written.clone(), record.comparison, time_column);
            let update = match self.index.apply(key.clone(), entry, &ctx) {
                Ok(update) => update,
                Err(err) => {
                    let restored = self.roll_back(journal);
                    warn!(
                        segment = new.name(),
                        restored,
                        "rolled back segment after a failed index update"
                    );
                    self.update_primary_key_gauge();
                    return Err(err.into());
                }
            };
            if update.outcome == IndexOutcome::Rejected {
                if self.config.mode == MetadataMode::Dedup {
                    debug!(
                        segment = new.name(),
                        key = %record.primary_key,
                        "duplicate primary key"
                    );
                }
            } else {
                journal.push(JournalEntry {
                    key,
                    written,
                    displaced: update.displaced,
                });
            }
            counts.record(update.outcome);
        }
        if let (Some(old), Some(old_records)) = (old, old_records) {
            counts.removed = self.remove_owned(old.id(), old_records);
        }
        self.update_primary_key_gauge();
        Ok(SegmentOutcome::Applied(counts))
    }

    /// Undoes journaled writes newest first; keys rewritten since are left alone.
    fn roll_back(&self, journal: Vec<JournalEntry>) -> usize {
        journal
            .into_iter()
            .rev()
            .map(|entry| {
                self.index
                    .restore(&entry.key, &entry.written, entry.displaced)
            })
            .filter(|restored| *restored)
            .count()
    }

    fn remove_records(&self, segment: &dyn Segment) -> Result<SegmentOutcome, MetadataError> {
        if self.config.ttl_enabled() {
            let max_time = self.max_time(segment)?;
            if let Some(reason) = self.out_of_ttl(max_time) {
                info!(
                    segment = segment.name(),
                    max_time,
                    ttl = self.config.metadata_ttl,
                    "skip removing segment as its max time is out of TTL"
                );
                return Ok(SegmentOutcome::Skipped(reason));
            }
        }
        let records = self.read_all(segment)?;
        let removed = self.remove_owned(segment.id(), records);
        self.update_primary_key_gauge();
        Ok(SegmentOutcome::Applied(AppliedCounts {
            removed,
            ..AppliedCounts::default()
        }))
    }

    fn remove_owned(&self, segment: &SegmentId, records: Vec<RecordInfo>) -> usize {
        records
            .into_iter()
            .filter(|record| {
                let key = self.config.hash_function.hash(&record.primary_key);
                self.index
                    .remove(&key, &RecordLocation::new(Arc::clone(segment), record.doc_id))
            })
            .count()
    }

    /// Reads the whole record stream before the index is touched.
    fn read_all(&self, segment: &dyn Segment) -> Result<Vec<RecordInfo>, MetadataError> {
        let spec = RecordReaderSpec {
            primary_key_columns: &self.config.primary_key_columns,
            comparison_columns: &self.config.comparison_columns,
        };
        let records = segment
            .read_records(spec)?
            .collect::<Result<Vec<_>, SegmentError>>()?;
        Ok(records)
    }

    fn max_time(&self, segment: &dyn Segment) -> Result<f64, MetadataError> {
        let column = self
            .config
            .time_column()
            .ok_or_else(|| ConfigError::MissingTimeColumn {
                table: self.config.table_name_with_type.clone(),
                mode: self.config.mode,
            })?;
        let metadata = segment.metadata().column(column).ok_or_else(|| {
            SegmentError::MissingColumn {
                segment: segment.name().to_string(),
                column: column.to_string(),
            }
        })?;
        let max_time = metadata
            .max_value
            .as_ref()
            .and_then(|value| value.as_f64())
            .ok_or_else(|| SegmentError::NonNumericMax {
                segment: segment.name().to_string(),
                column: column.to_string(),
            })?;
        Ok(max_time)
    }

    fn out_of_ttl(&self, time: f64) -> Option<SkipReason> {
        let floor = self.watermark.ttl_floor(self.config.metadata_ttl);
        (self.config.ttl_enabled() && time < floor).then_some(SkipReason::OutOfTtl {
            max_time: time,
            floor,
        })
    }

    fn update_context<'a>(
        &'a self,
        comparison: ComparisonMode,
        replacing: Option<&'a SegmentId>,
    ) -> UpdateContext<'a> {
        UpdateContext {
            mode: self.config.mode,
            comparison,
            comparison_columns: &self.config.comparison_columns,
            time_column: self.config.time_column(),
            replacing,
            ttl_floor: self
                .config
                .ttl_enabled()
                .then(|| self.watermark.ttl_floor(self.config.metadata_ttl)),
        }
    }

    fn ensure_supported(&self, segment: &dyn Segment) -> Result<(), MetadataError> {
        match segment.kind() {
            SegmentKind::Immutable => Ok(()),
            kind => Err(MetadataError::UnsupportedSegment {
                segment: segment.name().to_string(),
                kind,
                table: self.config.table_name_with_type.clone(),
            }),
        }
    }

    fn wrap(&self, action: &'static str, segment: String, err: MetadataError) -> MetadataError {
        MetadataError::SegmentOperation {
            action,
            segment,
            table: self.config.table_name_with_type.clone(),
            manager: self.config.mode.manager_name(),
            source: Box::new(err),
        }
    }

    fn update_primary_key_gauge(&self) {
        self.set_primary_key_gauge(self.index.len() as u64);
    }

    fn set_primary_key_gauge(&self, value: u64) {
        self.metrics.set_partition_gauge(
            &self.config.table_name_with_type,
            self.config.partition_id,
            primary_keys_gauge(self.config.mode),
            value,
        );
    }
}

impl<I: PrimaryKeyIndex> fmt::Debug for PartitionMetadataManager<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionMetadataManager")
            .field("table", &self.config.table_name_with_type)
            .field("partition_id", &self.config.partition_id)
            .field("mode", &self.config.mode)
            .field("state", &self.gate.state())
            .field("watermark", &self.watermark.get())
            .field("primary_keys", &self.index.len())
            .finish()
    }
}
