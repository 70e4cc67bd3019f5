use partmeta::{
    ComparableValue, ComparisonColumns, ComparisonError, ComparisonValue, HashFunction,
    InMemoryMetrics, IndexEntry, IndexError, IndexOutcome, MemorySegment, MemoryWatermarkStore,
    MetadataConfig, MetadataError, MetadataMode, OrderedIndex, PartitionMetadataManager,
    PrimaryKey, PrimaryKeyIndex, RecordInfo, RecordOutcome, Segment, SegmentId, SkipReason,
    SweepOutcome, ValueType, UPSERT_PRIMARY_KEYS_COUNT,
    UPSERT_REMOVE_EXPIRED_PRIMARY_KEYS_TIME_MS,
};
use std::sync::Arc;

const TABLE: &str = "orders_REALTIME";

fn config(columns: &[&str]) -> MetadataConfig {
    MetadataConfig::new(TABLE, 2, MetadataMode::Upsert, vec!["order_id".to_string()])
        .with_comparison_columns(columns.iter().map(|column| column.to_string()).collect())
}

fn record(id: i64, doc_id: u32, ts: i64, seq: i64) -> RecordInfo {
    RecordInfo::new(
        PrimaryKey::single(id),
        doc_id,
        ComparisonColumns::new().with("ts", ts).with("seq", seq),
    )
}

fn stored<I: PrimaryKeyIndex>(manager: &PartitionMetadataManager<I>, id: i64) -> IndexEntry {
    manager
        .index()
        .get(&HashFunction::None.hash(&PrimaryKey::single(id)))
        .expect("stored entry")
}

#[test]
fn newer_segment_supersedes_older_records() {
    let manager = PartitionMetadataManager::new(config(&["ts", "seq"])).expect("manager");
    let first = MemorySegment::new("seg_0", vec![record(1, 0, 10, 1), record(2, 1, 10, 1)]);
    let second = MemorySegment::new("seg_1", vec![record(1, 0, 20, 1), record(2, 1, 5, 1)]);

    manager.add_segment(&first).expect("add");
    let counts = manager
        .add_segment(&second)
        .expect("add")
        .applied()
        .expect("applied");

    assert_eq!((counts.superseded, counts.rejected), (1, 1));
    assert_eq!(&*stored(&manager, 1).location.segment, "seg_1");
    assert_eq!(&*stored(&manager, 2).location.segment, "seg_0");
}

#[test]
fn sealed_records_are_ordered_by_column_dominance() {
    let manager = PartitionMetadataManager::new(config(&["ts", "seq"])).expect("manager");
    manager
        .add_segment(&MemorySegment::new("seg_0", vec![record(1, 0, 10, 5)]))
        .expect("add");

    // Equal ts, lower seq: stored dominates.
    let outcome = manager
        .add_segment(&MemorySegment::new("seg_1", vec![record(1, 0, 10, 4)]))
        .expect("add");
    assert_eq!(outcome.applied().expect("applied").rejected, 1);

    // Lower ts but higher seq: accepted and stored unmerged.
    manager
        .add_segment(&MemorySegment::new("seg_2", vec![record(1, 0, 9, 6)]))
        .expect("add");
    let entry = stored(&manager, 1);
    assert_eq!(&*entry.location.segment, "seg_2");
    assert_eq!(entry.version.value_of("ts"), Some(&ComparableValue::Int(9)));
    assert_eq!(entry.time, 9.0);
}

#[test]
fn reloaded_segment_with_same_name_replaces_its_predecessor() {
    let metrics = InMemoryMetrics::new();
    let manager = PartitionMetadataManager::builder(config(&["ts", "seq"]))
        .index(OrderedIndex::new())
        .metrics(Arc::new(metrics.clone()))
        .build()
        .expect("manager");
    let old = MemorySegment::new("seg_0", vec![record(1, 0, 10, 1), record(2, 1, 20, 1)]);
    let reloaded = MemorySegment::new("seg_0", vec![record(1, 0, 10, 1)]);
    manager.add_segment(&old).expect("add");

    let counts = manager
        .replace_segment(&old, &reloaded)
        .expect("replace")
        .applied()
        .expect("applied");

    assert_eq!((counts.superseded, counts.removed), (1, 1));
    assert_eq!(manager.num_primary_keys(), 1);
    assert!(stored(&manager, 1).location.is_in(reloaded.id()));
    assert_eq!(metrics.gauge(TABLE, 2, UPSERT_PRIMARY_KEYS_COUNT), Some(1));
}

#[test]
fn replacement_stores_the_new_record_version() {
    let manager = PartitionMetadataManager::new(config(&["ts", "seq"])).expect("manager");
    let old = MemorySegment::new("seg_0", vec![record(1, 0, 100, 1)]);
    let reloaded = MemorySegment::new("seg_0", vec![record(1, 0, 50, 2)]);
    manager.add_segment(&old).expect("add");

    manager.replace_segment(&old, &reloaded).expect("replace");

    let entry = stored(&manager, 1);
    assert!(entry.location.is_in(reloaded.id()));
    assert_eq!(entry.version.value_of("ts"), Some(&ComparableValue::Int(50)));
    assert_eq!(entry.version.value_of("seq"), Some(&ComparableValue::Int(2)));
    assert_eq!(entry.time, 50.0);

    let newer = manager
        .add_segment(&MemorySegment::new("seg_1", vec![record(1, 0, 70, 2)]))
        .expect("add")
        .applied()
        .expect("applied");
    assert_eq!((newer.superseded, newer.rejected), (1, 0));
    assert_eq!(&*stored(&manager, 1).location.segment, "seg_1");
}

#[test]
fn failed_segment_add_is_rolled_back() {
    let metrics = InMemoryMetrics::new();
    let manager = PartitionMetadataManager::builder(config(&["ts"]))
        .metrics(Arc::new(metrics.clone()))
        .build()
        .expect("manager");
    let ts_only = |id: i64, doc_id: u32, ts: ComparisonValue| {
        RecordInfo::new(PrimaryKey::single(id), doc_id, ComparisonColumns::new().with("ts", ts))
    };
    let first = MemorySegment::new("seg_0", vec![ts_only(2, 0, 5_i64.into())]);
    manager.add_segment(&first).expect("add");
    let mixed = MemorySegment::new(
        "seg_1",
        vec![
            ts_only(1, 0, 10_i64.into()),
            ts_only(2, 1, "oops".into()),
            ts_only(3, 2, 10_i64.into()),
        ],
    );

    let err = manager.add_segment(&mixed).expect_err("type mismatch");

    assert!(matches!(
        err.root(),
        MetadataError::Index(IndexError::Comparison(ComparisonError::TypeMismatch { .. }))
    ));
    assert_eq!(manager.num_primary_keys(), 1);
    assert!(manager
        .index()
        .get(&HashFunction::None.hash(&PrimaryKey::single(1_i64)))
        .is_none());
    assert!(stored(&manager, 2).location.is_in(first.id()));
    assert_eq!(metrics.gauge(TABLE, 2, UPSERT_PRIMARY_KEYS_COUNT), Some(1));
}

#[test]
fn failed_replace_keeps_the_old_segment_in_place() {
    let manager = PartitionMetadataManager::new(config(&["ts", "seq"])).expect("manager");
    let old = MemorySegment::new("seg_0", vec![record(1, 0, 10, 1), record(2, 1, 10, 1)]);
    let other = MemorySegment::new("seg_9", vec![record(3, 0, 5, 1)]);
    manager.add_segment(&old).expect("add");
    manager.add_segment(&other).expect("add");
    let bad = RecordInfo::new(
        PrimaryKey::single(3_i64),
        1,
        ComparisonColumns::new().with("ts", "late").with("seq", 1_i64),
    );
    let new = MemorySegment::new("seg_0", vec![record(1, 0, 20, 1), bad]);

    let err = manager.replace_segment(&old, &new).expect_err("type mismatch");

    match &err {
        MetadataError::SegmentOperation { action, .. } => assert_eq!(*action, "replacing"),
        other => panic!("expected wrapped error, got {other:?}"),
    }
    assert_eq!(manager.num_primary_keys(), 3);
    let first = stored(&manager, 1);
    assert!(first.location.is_in(old.id()));
    assert_eq!(first.version.value_of("ts"), Some(&ComparableValue::Int(10)));
    assert!(stored(&manager, 2).location.is_in(old.id()));
    assert!(stored(&manager, 3).location.is_in(other.id()));
}

#[test]
fn ingested_partial_versions_merge_into_stored_version() {
    let manager = PartitionMetadataManager::new(config(&["ts", "region"])).expect("manager");
    let consuming: SegmentId = Arc::from("seg_consuming");
    let key = PrimaryKey::single(7_i64);

    let first = manager
        .ingest_record(
            &consuming,
            RecordInfo::new(key.clone(), 0, ComparisonColumns::new().with("ts", 100_i64)),
        )
        .expect("ingest");
    assert_eq!(first, RecordOutcome::Indexed(IndexOutcome::Inserted));

    let older = manager
        .ingest_record(
            &consuming,
            RecordInfo::new(key.clone(), 1, ComparisonColumns::new().with("ts", 99_i64)),
        )
        .expect("ingest");
    assert_eq!(older, RecordOutcome::Indexed(IndexOutcome::Rejected));

    let regional = ComparisonColumns::new()
        .with("ts", ComparisonValue::null(ValueType::Int))
        .with("region", "us");
    let merged = manager
        .ingest_record(&consuming, RecordInfo::new(key, 2, regional))
        .expect("ingest");
    assert_eq!(merged, RecordOutcome::Indexed(IndexOutcome::Superseded));

    let entry = stored(&manager, 7);
    assert_eq!(entry.location.doc_id, 2);
    assert_eq!(
        entry.version,
        ComparisonColumns::new().with("ts", 100_i64).with("region", "us")
    );
    assert_eq!(entry.time, 100.0);
}

#[test]
fn type_mismatch_surfaces_as_configuration_error() {
    let manager = PartitionMetadataManager::new(config(&["ts"])).expect("manager");
    let consuming: SegmentId = Arc::from("seg_consuming");
    manager
        .ingest_record(
            &consuming,
            RecordInfo::new(
                PrimaryKey::single(1_i64),
                0,
                ComparisonColumns::new().with("ts", 5_i64),
            ),
        )
        .expect("ingest");

    let err = manager
        .ingest_record(
            &consuming,
            RecordInfo::new(
                PrimaryKey::single(1_i64),
                1,
                ComparisonColumns::new().with("ts", "late"),
            ),
        )
        .expect_err("mismatch");

    assert!(matches!(
        err,
        MetadataError::Index(IndexError::Comparison(ComparisonError::TypeMismatch { .. }))
    ));
}

#[test]
fn sweep_evicts_keys_behind_the_ttl_floor() {
    let metrics = InMemoryMetrics::new();
    let store = MemoryWatermarkStore::new();
    let manager = PartitionMetadataManager::builder(config(&["ts"]).with_ttl(50.0, "ts"))
        .watermark_store(store.clone())
        .metrics(Arc::new(metrics.clone()))
        .build()
        .expect("manager");
    let consuming: SegmentId = Arc::from("seg_consuming");
    for (id, ts) in [(1_i64, 100_i64), (2, 160), (3, 220)] {
        manager
            .ingest_record(
                &consuming,
                RecordInfo::new(PrimaryKey::single(id), 0, ComparisonColumns::new().with("ts", ts)),
            )
            .expect("ingest");
    }

    let outcome = manager.remove_expired_primary_keys().expect("sweep");

    assert_eq!(outcome, SweepOutcome::Swept { removed: 2, floor: 170.0 });
    assert_eq!(manager.num_primary_keys(), 1);
    assert_eq!(store.value(), Some(220.0));
    assert_eq!(
        metrics.timer_count(TABLE, UPSERT_REMOVE_EXPIRED_PRIMARY_KEYS_TIME_MS),
        1
    );
    assert_eq!(metrics.gauge(TABLE, 2, UPSERT_PRIMARY_KEYS_COUNT), Some(1));

    let late = manager
        .ingest_record(
            &consuming,
            RecordInfo::new(
                PrimaryKey::single(9_i64),
                1,
                ComparisonColumns::new().with("ts", 100_i64),
            ),
        )
        .expect("ingest");
    assert_eq!(
        late,
        RecordOutcome::Skipped(SkipReason::OutOfTtl {
            max_time: 100.0,
            floor: 170.0
        })
    );
}

#[test]
fn sweep_is_a_no_op_without_ttl() {
    let manager = PartitionMetadataManager::new(config(&["ts"])).expect("manager");
    assert_eq!(
        manager.remove_expired_primary_keys().expect("sweep"),
        SweepOutcome::Skipped(SkipReason::TtlDisabled)
    );
}
