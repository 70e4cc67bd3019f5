use partmeta::{
    watermark_file_path, ColumnMetadata, ComparableValue, ComparisonColumns, HashFunction,
    IndexOutcome, MemorySegment, MemoryWatermarkStore, MetadataConfig, MetadataError,
    MetadataMode, PartitionMetadataManager, PrimaryKey, PrimaryKeyIndex, RecordInfo,
    RecordOutcome, Segment, SegmentError, SegmentId, SegmentMetadata, SegmentOutcome, SkipReason,
    SweepOutcome,
};
use proptest::prelude::*;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn dedup_config(ttl: f64) -> MetadataConfig {
    MetadataConfig::new("clicks_REALTIME", 0, MetadataMode::Dedup, vec!["click_id".to_string()])
        .with_ttl(ttl, "ts")
}

fn segment(name: &str, first_id: i64, times: &[i64]) -> MemorySegment {
    let records = times
        .iter()
        .enumerate()
        .map(|(doc, ts)| {
            RecordInfo::new(
                PrimaryKey::single(first_id + doc as i64),
                doc as u32,
                ComparisonColumns::new().with("ts", *ts),
            )
        })
        .collect();
    MemorySegment::new(name, records)
}

#[test]
fn segments_behind_the_floor_are_skipped() {
    let manager = PartitionMetadataManager::builder(dedup_config(50.0))
        .watermark_store(MemoryWatermarkStore::with_value(200.0))
        .build()
        .expect("manager");
    assert_eq!(manager.watermark(), 200.0);

    let stale = manager.add_segment(&segment("seg_140", 0, &[120, 140])).expect("add");
    assert_eq!(
        stale,
        SegmentOutcome::Skipped(SkipReason::OutOfTtl {
            max_time: 140.0,
            floor: 150.0
        })
    );
    assert_eq!(manager.num_primary_keys(), 0);

    let recent = manager.add_segment(&segment("seg_160", 10, &[155, 160])).expect("add");
    assert!(!recent.is_skipped());
    assert_eq!(manager.watermark(), 200.0);

    let newest = manager.add_segment(&segment("seg_250", 20, &[250])).expect("add");
    assert!(!newest.is_skipped());
    assert_eq!(manager.watermark(), 250.0);
    assert_eq!(manager.num_primary_keys(), 3);
}

#[test]
fn removing_an_expired_segment_is_skipped() {
    let manager = PartitionMetadataManager::new(dedup_config(50.0)).expect("manager");
    let old = segment("seg_old", 0, &[100]);
    manager.add_segment(&old).expect("add");
    manager.add_segment(&segment("seg_new", 10, &[300])).expect("add");

    let outcome = manager.remove_segment(&old).expect("remove");

    assert!(matches!(
        outcome,
        SegmentOutcome::Skipped(SkipReason::OutOfTtl { .. })
    ));
    assert_eq!(manager.num_primary_keys(), 2);
    assert_eq!(
        manager.remove_expired_primary_keys().expect("sweep"),
        SweepOutcome::Swept {
            removed: 1,
            floor: 250.0
        }
    );
}

#[test]
fn expired_entry_does_not_block_a_new_record() {
    let manager = PartitionMetadataManager::new(dedup_config(50.0)).expect("manager");
    manager.add_segment(&segment("seg_0", 1, &[100])).expect("add");
    manager.add_segment(&segment("seg_1", 2, &[200])).expect("add");
    let consuming: SegmentId = Arc::from("seg_consuming");

    let outcome = manager
        .ingest_record(
            &consuming,
            RecordInfo::new(
                PrimaryKey::single(1_i64),
                0,
                ComparisonColumns::new().with("ts", 160_i64),
            ),
        )
        .expect("ingest");

    assert_eq!(outcome, RecordOutcome::Indexed(IndexOutcome::Inserted));
}

#[test]
fn replace_folds_new_segment_time_into_watermark() {
    let manager = PartitionMetadataManager::new(dedup_config(50.0)).expect("manager");
    let old = segment("seg_0", 0, &[100, 120]);
    manager.add_segment(&old).expect("add");
    assert_eq!(manager.watermark(), 120.0);

    let new = segment("seg_0", 0, &[300, 320]);
    let outcome = manager.replace_segment(&old, &new).expect("replace");

    assert!(!outcome.is_skipped());
    assert_eq!(manager.watermark(), 320.0);
    assert_eq!(manager.num_primary_keys(), 2);
}

#[test]
fn replace_with_segment_behind_the_floor_keeps_old_keys() {
    let manager = PartitionMetadataManager::builder(dedup_config(50.0))
        .watermark_store(MemoryWatermarkStore::with_value(200.0))
        .build()
        .expect("manager");
    let old = segment("seg_0", 0, &[180, 190]);
    manager.add_segment(&old).expect("add");

    let stale = segment("seg_0", 0, &[110, 120]);
    let outcome = manager.replace_segment(&old, &stale).expect("replace");

    assert_eq!(
        outcome,
        SegmentOutcome::Skipped(SkipReason::OutOfTtl {
            max_time: 120.0,
            floor: 150.0
        })
    );
    assert_eq!(manager.watermark(), 200.0);
    assert_eq!(manager.num_primary_keys(), 2);
    let entry = manager
        .index()
        .get(&HashFunction::None.hash(&PrimaryKey::single(0_i64)))
        .expect("key 0");
    assert!(entry.location.is_in(old.id()));
}

#[test]
fn replace_with_empty_segment_is_skipped() {
    let manager = PartitionMetadataManager::new(dedup_config(50.0)).expect("manager");
    let old = segment("seg_0", 0, &[100, 120]);
    manager.add_segment(&old).expect("add");

    let outcome = manager
        .replace_segment(&old, &MemorySegment::empty("seg_0"))
        .expect("replace");

    assert_eq!(outcome, SegmentOutcome::Skipped(SkipReason::EmptySegment));
    assert_eq!(manager.num_primary_keys(), 2);
    assert_eq!(manager.watermark(), 120.0);
}

#[test]
fn disabling_ttl_deletes_the_persisted_watermark() {
    let store = MemoryWatermarkStore::with_value(5_000.0);
    let config = MetadataConfig::new(
        "clicks_REALTIME",
        0,
        MetadataMode::Dedup,
        vec!["click_id".to_string()],
    );
    let manager = PartitionMetadataManager::builder(config)
        .watermark_store(store.clone())
        .build()
        .expect("manager");

    assert_eq!(manager.watermark(), 0.0);
    assert_eq!(store.value(), None);
    assert_eq!(store.delete_count(), 1);
}

#[test]
fn watermark_survives_restart_through_index_dir() {
    let dir = TempDir::new().expect("tempdir");
    let config = dedup_config(50.0).with_table_index_dir(dir.path());
    {
        let manager = PartitionMetadataManager::new(config.clone()).expect("manager");
        manager.add_segment(&segment("seg_0", 0, &[300])).expect("add");
        manager.remove_expired_primary_keys().expect("sweep");
        manager.stop();
        manager.close().expect("close");
    }
    assert!(watermark_file_path(dir.path(), 0, MetadataMode::Dedup).exists());

    let restarted = PartitionMetadataManager::new(config).expect("manager");
    assert_eq!(restarted.watermark(), 300.0);
}

#[test]
fn unreadable_watermark_falls_back_to_unset() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(
        watermark_file_path(dir.path(), 0, MetadataMode::Dedup),
        b"garbage",
    )
    .expect("write");

    let manager = PartitionMetadataManager::new(dedup_config(50.0).with_table_index_dir(dir.path()))
        .expect("manager");

    assert_eq!(manager.watermark(), 0.0);
}

#[test]
fn missing_time_metadata_is_reported() {
    let manager = PartitionMetadataManager::new(dedup_config(50.0)).expect("manager");
    let blind = segment("seg_blind", 0, &[10]).with_metadata(SegmentMetadata::new(1));

    let err = manager.add_segment(&blind).expect_err("no time metadata");

    assert!(matches!(
        err.root(),
        MetadataError::Segment(SegmentError::MissingColumn { column, .. }) if column == "ts"
    ));
}

#[test]
fn non_numeric_time_metadata_is_reported() {
    let manager = PartitionMetadataManager::new(dedup_config(50.0)).expect("manager");
    let metadata = SegmentMetadata::new(1).with_column(
        "ts",
        ColumnMetadata {
            max_value: Some(ComparableValue::from("tomorrow")),
        },
    );
    let odd = segment("seg_odd", 0, &[10]).with_metadata(metadata);

    let err = manager.remove_segment(&odd).expect_err("string max");

    assert!(matches!(
        err.root(),
        MetadataError::Segment(SegmentError::NonNumericMax { .. })
    ));
}

proptest! {
    #[test]
    fn watermark_is_monotonic_across_out_of_order_segments(
        maxima in prop::collection::vec(1_i64..10_000, 1..24),
    ) {
        let manager = PartitionMetadataManager::new(dedup_config(100.0)).expect("manager");
        let mut expected = 0.0_f64;
        for (idx, max) in maxima.iter().enumerate() {
            let before = manager.watermark();
            manager
                .add_segment(&segment(&format!("seg_{idx}"), idx as i64 * 1_000, &[*max]))
                .expect("add");
            expected = expected.max(*max as f64);
            prop_assert!(manager.watermark() >= before);
            prop_assert_eq!(manager.watermark(), expected);
        }
    }

    #[test]
    fn sweep_is_idempotent(
        times in prop::collection::vec(1_i64..1_000, 1..64),
        ttl in 1_u32..500,
    ) {
        let manager = PartitionMetadataManager::new(dedup_config(f64::from(ttl))).expect("manager");
        let consuming: SegmentId = Arc::from("seg_consuming");
        for (idx, ts) in times.iter().enumerate() {
            manager
                .ingest_record(
                    &consuming,
                    RecordInfo::new(
                        PrimaryKey::single(idx as i64),
                        idx as u32,
                        ComparisonColumns::new().with("ts", *ts),
                    ),
                )
                .expect("ingest");
        }
        manager.remove_expired_primary_keys().expect("first sweep");
        let remaining = manager.num_primary_keys();

        let second = manager.remove_expired_primary_keys().expect("second sweep");

        prop_assert!(
            matches!(second, SweepOutcome::Swept { removed: 0, .. }),
            "second sweep should remove nothing, got {:?}",
            second
        );
        prop_assert_eq!(manager.num_primary_keys(), remaining);
    }
}
