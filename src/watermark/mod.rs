//! Largest-seen comparison time per partition and its persistence.

pub mod store;

pub use store::{FileWatermarkStore, MemoryWatermarkStore, WatermarkError, WatermarkStore};

use crate::config::MetadataMode;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Value of an unset watermark; comparison times are assumed positive.
pub const TTL_WATERMARK_NOT_SET: f64 = 0.0;

/// File name prefix shared by dedup and upsert watermark files.
pub const TTL_WATERMARK_TABLE_PARTITION: &str = "ttl.watermark.partition.";

/// Path of the watermark file for a partition.
///
/// Dedup files carry a `.dedup` suffix and never share a file with the upsert watermark of
/// the same partition.
pub fn watermark_file_path(
    table_index_dir: &Path,
    partition_id: u32,
    mode: MetadataMode,
) -> PathBuf {
    let name = match mode {
        MetadataMode::Dedup => format!("{TTL_WATERMARK_TABLE_PARTITION}{partition_id}.dedup"),
        MetadataMode::Upsert => format!("{TTL_WATERMARK_TABLE_PARTITION}{partition_id}"),
    };
    table_index_dir.join(name)
}

/// Lock-free monotonic maximum over `f64` comparison times.
#[derive(Debug)]
pub struct Watermark {
    bits: AtomicU64,
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new(TTL_WATERMARK_NOT_SET)
    }
}

impl Watermark {
    pub fn new(initial: f64) -> Self {
        Self {
            bits: AtomicU64::new(initial.to_bits()),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Folds `time` into the watermark and returns the resulting value.
    pub fn observe(&self, time: f64) -> f64 {
        match self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (time > f64::from_bits(bits)).then_some(time.to_bits())
            }) {
            Ok(_) => time,
            Err(current) => f64::from_bits(current),
        }
    }

    /// Smallest comparison time still retained under `ttl`.
    pub fn ttl_floor(&self, ttl: f64) -> f64 {
        self.get() - ttl
    }
}
