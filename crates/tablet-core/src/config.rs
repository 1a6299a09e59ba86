//! Node configuration (spec.md §6 "Configuration (enumerated)").
//!
//! Mirrors the teacher's convention of a flat `clap`-derived struct with
//! sensible defaults, parsed once at process start and then shared as an
//! immutable `Arc` (see [`crate::orchestration::Orchestrator`]).

use std::time::Duration;

use clap::Parser;

use tablet_snapshot::{FileCompression, SnapshotCompression};

#[derive(Debug, Clone, Parser)]
#[command(name = "tablet-server", about = "Tablet storage node")]
pub struct Config {
    /// Comma-separated list of data root paths.
    #[arg(long, default_value = "./data", value_delimiter = ',')]
    pub db_root_path: Vec<String>,

    /// Comma-separated list of recycle-bin root paths.
    #[arg(long, default_value = "./recycle", value_delimiter = ',')]
    pub recycle_bin_root_path: Vec<String>,

    #[arg(long, default_value_t = 60)]
    pub gc_interval_minutes: u64,
    #[arg(long, default_value_t = 2)]
    pub gc_pool_size: usize,
    #[arg(long, default_value_t = 4)]
    pub task_pool_size: usize,
    #[arg(long, default_value_t = 4)]
    pub io_pool_size: usize,
    #[arg(long, default_value_t = 2)]
    pub snapshot_pool_size: usize,

    #[arg(long, default_value_t = 256 * 1024 * 1024)]
    pub binlog_single_file_max_size: u64,
    #[arg(long, default_value_t = 60)]
    pub binlog_delete_interval_minutes: u64,
    #[arg(long, default_value_t = 1)]
    pub binlog_sync_to_disk_interval_seconds: u64,
    #[arg(long, default_value_t = false)]
    pub binlog_notify_on_put: bool,

    #[arg(long, default_value_t = 100_000)]
    pub make_snapshot_threshold_offset: u64,
    /// Hour of day (0-23) the daily snapshot scheduler fires.
    #[arg(long, default_value_t = 2)]
    pub make_snapshot_time: u8,
    #[arg(long, default_value_t = 60)]
    pub make_snapshot_check_interval_seconds: u64,
    #[arg(long, default_value_t = 1440)]
    pub make_snapshot_offline_interval_minutes: u64,

    #[arg(long, value_enum, default_value = "off")]
    pub snapshot_compression: SnapshotCompressionArg,
    #[arg(long, value_enum, default_value = "off")]
    pub file_compression: FileCompressionArg,

    #[arg(long, default_value_t = 30 * 24 * 60)]
    pub absolute_ttl_max_minutes: u64,
    #[arg(long, default_value_t = 1_000_000)]
    pub latest_ttl_max: u64,
    #[arg(long, default_value_t = 1000)]
    pub max_traverse_cnt: u32,
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    pub scan_max_bytes_size: u64,
    #[arg(long, default_value_t = 1024)]
    pub scan_reserve_size: usize,

    #[arg(long, default_value_t = true)]
    pub recycle_bin_enabled: bool,
    #[arg(long, default_value_t = 60 * 24)]
    pub recycle_ttl_minutes: u64,
    #[arg(long, default_value_t = 100)]
    pub put_slow_log_threshold_ms: u64,
    #[arg(long, default_value_t = 100)]
    pub query_slow_log_threshold_ms: u64,

    #[arg(long, default_value = "")]
    pub zk_cluster: String,
    #[arg(long, default_value = "/tablet")]
    pub zk_root_path: String,
    #[arg(long, default_value_t = 10_000)]
    pub zk_session_timeout_ms: u64,
    #[arg(long, default_value_t = 1_000)]
    pub zk_keep_alive_check_interval_ms: u64,
    #[arg(long, default_value = "0.0.0.0:9527")]
    pub endpoint: String,
    #[arg(long, default_value_t = false)]
    pub use_name: bool,

    /// Default segment count per inner index (spec.md §4.2).
    #[arg(long, default_value_t = 8)]
    pub default_seg_cnt: usize,

    /// How long a sibling partition's load waits for an index file to
    /// appear before giving up (C8/§5).
    #[arg(long, default_value_t = 120)]
    pub load_index_max_wait_time_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SnapshotCompressionArg {
    Off,
    Zlib,
    Snappy,
}

impl From<SnapshotCompressionArg> for SnapshotCompression {
    fn from(value: SnapshotCompressionArg) -> Self {
        match value {
            SnapshotCompressionArg::Off => SnapshotCompression::Off,
            SnapshotCompressionArg::Zlib => SnapshotCompression::Zlib,
            SnapshotCompressionArg::Snappy => SnapshotCompression::Snappy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FileCompressionArg {
    Off,
    Zlib,
    Lz4,
}

impl From<FileCompressionArg> for FileCompression {
    fn from(value: FileCompressionArg) -> Self {
        match value {
            FileCompressionArg::Off => FileCompression::Off,
            FileCompressionArg::Zlib => FileCompression::Zlib,
            FileCompressionArg::Lz4 => FileCompression::Lz4,
        }
    }
}

impl Config {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_minutes * 60)
    }
    pub fn binlog_delete_interval(&self) -> Duration {
        Duration::from_secs(self.binlog_delete_interval_minutes * 60)
    }
    pub fn make_snapshot_check_interval(&self) -> Duration {
        Duration::from_secs(self.make_snapshot_check_interval_seconds)
    }
    pub fn make_snapshot_offline_interval(&self) -> Duration {
        Duration::from_secs(self.make_snapshot_offline_interval_minutes * 60)
    }
    pub fn recycle_ttl(&self) -> Duration {
        Duration::from_secs(self.recycle_ttl_minutes * 60)
    }
    pub fn put_slow_log_threshold(&self) -> Duration {
        Duration::from_millis(self.put_slow_log_threshold_ms)
    }
    pub fn query_slow_log_threshold(&self) -> Duration {
        Duration::from_millis(self.query_slow_log_threshold_ms)
    }
    pub fn load_index_max_wait_time(&self) -> Duration {
        Duration::from_secs(self.load_index_max_wait_time_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["tablet-server"])
    }
}
