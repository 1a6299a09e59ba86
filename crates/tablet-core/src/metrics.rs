//! Process-wide prometheus metrics (ambient to C7/C10, not gated by any
//! spec.md Non-goal on query/wire layers).
//!
//! Grounded on the teacher's `worker_metrics` module: a `lazy_static!` block
//! of typed collectors plus an explicit `register_custom_metrics`.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref PUT_COUNT: IntCounterVec = IntCounterVec::new(
        Opts::new("tablet_put_total", "Number of Put calls handled"),
        &["tid", "pid"]
    )
    .unwrap();
    pub static ref GET_COUNT: IntCounterVec = IntCounterVec::new(
        Opts::new("tablet_get_total", "Number of Get calls handled"),
        &["tid", "pid"]
    )
    .unwrap();
    pub static ref SCAN_COUNT: IntCounterVec = IntCounterVec::new(
        Opts::new("tablet_scan_total", "Number of Scan calls handled"),
        &["tid", "pid"]
    )
    .unwrap();
    pub static ref SCAN_ROWS: IntCounterVec = IntCounterVec::new(
        Opts::new("tablet_scan_rows_total", "Rows returned by Scan"),
        &["tid", "pid"]
    )
    .unwrap();
    pub static ref PUT_LATENCY_SEC: HistogramVec = HistogramVec::new(
        HistogramOpts::new("tablet_put_latency_sec", "Put handler latency in seconds"),
        &["tid", "pid"]
    )
    .unwrap();
    pub static ref DISK_USAGE_BYTES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("tablet_disk_usage_bytes", "Sampled on-disk size per partition"),
        &["tid", "pid"]
    )
    .unwrap();
    pub static ref REPLICATION_LAG: IntGaugeVec = IntGaugeVec::new(
        Opts::new(
            "tablet_replication_lag_offset",
            "leader offset minus follower acknowledged offset"
        ),
        &["tid", "pid", "endpoint"]
    )
    .unwrap();
    pub static ref BINLOG_GC_DELETED: IntCounterVec = IntCounterVec::new(
        Opts::new("tablet_binlog_segments_deleted_total", "Binlog segments removed by GC"),
        &["tid", "pid"]
    )
    .unwrap();
    pub static ref MEMTABLE_GC_EVICTED: IntCounterVec = IntCounterVec::new(
        Opts::new("tablet_memtable_gc_evicted_total", "Expired MemTable entries removed by GC"),
        &["tid", "pid"]
    )
    .unwrap();
    pub static ref CATALOG_VERSION: IntGaugeVec = IntGaugeVec::new(
        Opts::new("tablet_catalog_version", "Version counter of the last CatalogRefresher::refresh"),
        &["node"]
    )
    .unwrap();
}

pub fn register_custom_metrics() {
    REGISTRY.register(Box::new(PUT_COUNT.clone())).unwrap();
    REGISTRY.register(Box::new(GET_COUNT.clone())).unwrap();
    REGISTRY.register(Box::new(SCAN_COUNT.clone())).unwrap();
    REGISTRY.register(Box::new(SCAN_ROWS.clone())).unwrap();
    REGISTRY.register(Box::new(PUT_LATENCY_SEC.clone())).unwrap();
    REGISTRY.register(Box::new(DISK_USAGE_BYTES.clone())).unwrap();
    REGISTRY.register(Box::new(REPLICATION_LAG.clone())).unwrap();
    REGISTRY.register(Box::new(BINLOG_GC_DELETED.clone())).unwrap();
    REGISTRY.register(Box::new(MEMTABLE_GC_EVICTED.clone())).unwrap();
    REGISTRY.register(Box::new(CATALOG_VERSION.clone())).unwrap();
}
