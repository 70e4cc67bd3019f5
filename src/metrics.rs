use crate::config::MetadataMode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Gauge holding the number of primary keys tracked by a dedup partition.
pub const DEDUP_PRIMARY_KEYS_COUNT: &str = "partmeta_dedup_primary_keys_count";
/// Gauge holding the number of primary keys tracked by an upsert partition.
pub const UPSERT_PRIMARY_KEYS_COUNT: &str = "partmeta_upsert_primary_keys_count";
/// Timer around the dedup expired-key sweep.
pub const DEDUP_REMOVE_EXPIRED_PRIMARY_KEYS_TIME_MS: &str =
    "partmeta_dedup_remove_expired_primary_keys_time_ms";
/// Timer around the upsert expired-key sweep.
pub const UPSERT_REMOVE_EXPIRED_PRIMARY_KEYS_TIME_MS: &str =
    "partmeta_upsert_remove_expired_primary_keys_time_ms";

pub fn primary_keys_gauge(mode: MetadataMode) -> &'static str {
    match mode {
        MetadataMode::Dedup => DEDUP_PRIMARY_KEYS_COUNT,
        MetadataMode::Upsert => UPSERT_PRIMARY_KEYS_COUNT,
    }
}

pub fn remove_expired_timer(mode: MetadataMode) -> &'static str {
    match mode {
        MetadataMode::Dedup => DEDUP_REMOVE_EXPIRED_PRIMARY_KEYS_TIME_MS,
        MetadataMode::Upsert => UPSERT_REMOVE_EXPIRED_PRIMARY_KEYS_TIME_MS,
    }
}

/// Fire-and-forget metrics emission.
pub trait MetricsSink: Send + Sync {
    fn set_partition_gauge(&self, table: &str, partition_id: u32, gauge: &'static str, value: u64);

    fn record_timer(&self, table: &str, timer: &'static str, elapsed: Duration);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_partition_gauge(&self, _: &str, _: u32, _: &'static str, _: u64) {}

    fn record_timer(&self, _: &str, _: &'static str, _: Duration) {}
}

type GaugeKey = (String, u32, &'static str);

/// Recording sink; clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetrics {
    gauges: Arc<Mutex<HashMap<GaugeKey, u64>>>,
    timers: Arc<Mutex<HashMap<(String, &'static str), Vec<Duration>>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gauge(&self, table: &str, partition_id: u32, gauge: &'static str) -> Option<u64> {
        self.gauges
            .lock()
            .get(&(table.to_string(), partition_id, gauge))
            .copied()
    }

    /// Number of samples recorded for `timer`.
    pub fn timer_count(&self, table: &str, timer: &'static str) -> usize {
        self.timers
            .lock()
            .get(&(table.to_string(), timer))
            .map_or(0, Vec::len)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn set_partition_gauge(&self, table: &str, partition_id: u32, gauge: &'static str, value: u64) {
        self.gauges
            .lock()
            .insert((table.to_string(), partition_id, gauge), value);
    }

    fn record_timer(&self, table: &str, timer: &'static str, elapsed: Duration) {
        self.timers
            .lock()
            .entry((table.to_string(), timer))
            .or_default()
            .push(elapsed);
    }
}
