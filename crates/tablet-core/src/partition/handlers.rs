//! Request handlers: Put, Get, Scan, Count, Traverse, Delete (spec.md §4.7,
//! C7). Each validates partition existence/state/role/format before
//! touching storage, then commits to the MemTable before appending to the
//! binlog — spec.md is explicit that "memtable commit then log" is
//! inverted from the usual WAL-first order: the binlog here is the
//! replication source, appended *after* the in-memory commit.

use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use tablet_commitlog::{Binlog, Dimension as LogDimension, LogEntry, Method, TsDimension};
use tablet_table::{BoundType, Column, Dimension, MemTable, ScanParams, TableIndex, TraverseCursor, TsValue};

use crate::error::ErrorCode;
use crate::metrics;
use crate::partition::lifecycle::PartitionStateMachine;
use crate::replicator::{Replicator, Role};
use crate::row::RowFormat;
use crate::slow::{SlowGuard, SlowOp};

pub struct PartitionThresholds {
    pub put_slow_log: Duration,
    pub query_slow_log: Duration,
    pub max_traverse_cnt: u32,
    pub scan_max_bytes_size: u64,
}

/// One live tablet partition: the state machine plus the storage and
/// replication handles it owns exclusively (spec.md §3 "a partition
/// exclusively owns its MemTable, Binlog, Snapshot, Replicator").
pub struct Partition {
    pub tid: u32,
    pub pid: u32,
    pub state: PartitionStateMachine,
    /// Copy-on-write snapshot of the index model (spec.md §9 "shared-pointer
    /// + atomic-store"): readers clone the `Arc`, writers publish a new one.
    pub table_index: RwLock<std::sync::Arc<TableIndex>>,
    pub columns: RwLock<std::sync::Arc<Vec<Column>>>,
    pub memtable: MemTable,
    pub binlog: Mutex<Binlog>,
    pub replicator: Replicator,
    pub row_format_version: u32,
    thresholds: PartitionThresholds,
}

impl Partition {
    /// `CreateTable`: a brand-new, empty partition starts life `Normal` —
    /// there is nothing to load.
    pub fn new(
        tid: u32,
        pid: u32,
        table_index: TableIndex,
        columns: Vec<Column>,
        binlog: Binlog,
        replicator: Replicator,
        row_format_version: u32,
        thresholds: PartitionThresholds,
    ) -> Self {
        Self::new_in_state(
            tid,
            pid,
            table_index,
            columns,
            binlog,
            replicator,
            row_format_version,
            thresholds,
            crate::partition::lifecycle::PartitionState::Normal,
        )
    }

    /// `LoadTable`: the partition starts `Loading` and only becomes visible
    /// to Put/Get/Scan once [`crate::partition::recovery::recover`] drives
    /// it to `Normal` (spec.md §4.6, §8).
    pub fn new_loading(
        tid: u32,
        pid: u32,
        table_index: TableIndex,
        columns: Vec<Column>,
        binlog: Binlog,
        replicator: Replicator,
        row_format_version: u32,
        thresholds: PartitionThresholds,
    ) -> Self {
        Self::new_in_state(
            tid,
            pid,
            table_index,
            columns,
            binlog,
            replicator,
            row_format_version,
            thresholds,
            crate::partition::lifecycle::PartitionState::Loading,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new_in_state(
        tid: u32,
        pid: u32,
        table_index: TableIndex,
        columns: Vec<Column>,
        binlog: Binlog,
        replicator: Replicator,
        row_format_version: u32,
        thresholds: PartitionThresholds,
        initial_state: crate::partition::lifecycle::PartitionState,
    ) -> Self {
        let seg_cnt = tablet_table::memtable::DEFAULT_SEG_CNT;
        let memtable = MemTable::new(table_index.inner_indexes.len() as u32, seg_cnt);
        Self {
            tid,
            pid,
            state: PartitionStateMachine::new(initial_state),
            table_index: RwLock::new(std::sync::Arc::new(table_index)),
            columns: RwLock::new(std::sync::Arc::new(columns)),
            memtable,
            binlog: Mutex::new(binlog),
            replicator,
            row_format_version,
            thresholds,
        }
    }

    fn ts_idx_for(&self, column_name: &str) -> Option<u32> {
        self.columns.read().iter().find(|c| c.name == column_name).and_then(|c| c.ts_idx)
    }

    fn require_leader_for_mutation(&self) -> Result<(), ErrorCode> {
        if self.replicator.is_follower_cluster() {
            return Err(ErrorCode::IsFollowerCluster);
        }
        if self.replicator.role() != Role::Leader {
            return Err(ErrorCode::TableIsFollower);
        }
        Ok(())
    }

    fn labels(&self) -> (String, String) {
        (self.tid.to_string(), self.pid.to_string())
    }
}

pub struct PutRequest {
    /// One `(index_name, key)` per [`tablet_table::InnerIndex`] this row
    /// participates in.
    pub dimensions: Vec<(String, Vec<u8>)>,
    /// One `(index_name, ts)` per logical index whose ts-column this row
    /// sets; a default single-index table passes exactly one entry here.
    pub ts_values: Vec<(String, i64)>,
    pub value: Vec<u8>,
    pub row_format: RowFormat,
}

pub fn put(partition: &Partition, req: PutRequest) -> Result<u64, ErrorCode> {
    partition.state.require_normal()?;
    partition.require_leader_for_mutation()?;
    req.row_format.check_compatible(partition.row_format_version)?;

    let (tid_label, pid_label) = partition.labels();
    let guard = SlowGuard::new(
        SlowOp::Put,
        partition.tid,
        partition.pid,
        req.dimensions.first().map(|(_, k)| k.as_slice()),
        partition.thresholds.put_slow_log,
        partition.thresholds.query_slow_log,
    );
    let timer = metrics::PUT_LATENCY_SEC.with_label_values(&[&tid_label, &pid_label]).start_timer();

    let index = partition.table_index.read().clone();
    if req.dimensions.len() > index.inner_indexes.len() {
        return Err(ErrorCode::InvalidDimensionParameter);
    }
    if req.dimensions.iter().any(|(_, key)| key.is_empty()) {
        return Err(ErrorCode::InvalidDimensionParameter);
    }
    if req.ts_values.iter().any(|(_, ts)| *ts <= 0) {
        return Err(ErrorCode::TsMustBeGreaterThanZero);
    }

    let mut log_dimensions = Vec::with_capacity(req.dimensions.len());
    let mut dimensions = Vec::with_capacity(req.dimensions.len());
    for (index_name, key) in &req.dimensions {
        let def = index.find_by_name(index_name).ok_or(ErrorCode::IdxNameNotFound)?;
        dimensions.push(Dimension {
            inner_pos: def.inner_pos,
            key: key.clone(),
        });
        log_dimensions.push(LogDimension {
            inner_pos: def.inner_pos,
            key: key.clone(),
        });
    }

    let mut ts_values = Vec::with_capacity(req.ts_values.len());
    let mut log_ts_dimensions = Vec::with_capacity(req.ts_values.len());
    for (index_name, ts) in &req.ts_values {
        let def = index.find_by_name(index_name).ok_or(ErrorCode::IdxNameNotFound)?;
        let ts_idx = def
            .ts_column
            .as_deref()
            .and_then(|c| partition.ts_idx_for(c))
            .unwrap_or(0);
        ts_values.push(TsValue { ts_idx, ts: *ts });
        log_ts_dimensions.push(TsDimension { ts_idx, ts: *ts });
    }
    if ts_values.is_empty() {
        ts_values.push(TsValue { ts_idx: 0, ts: 0 });
    }

    // MemTable commit happens before the binlog append: readers observe the
    // write immediately; followers observe it once replicated.
    partition.memtable.put(&dimensions, &ts_values, &req.value);

    let offset = partition.replicator.next_offset().map_err(|_| ErrorCode::WriteDataFailed)?;
    let entry = LogEntry {
        term: partition.replicator.term(),
        offset,
        method: Method::Put,
        dimensions: log_dimensions,
        ts_dimensions: log_ts_dimensions,
        value: req.value,
    };
    partition
        .binlog
        .lock()
        .append(&entry)
        .map_err(|_| ErrorCode::WriteDataFailed)?;

    timer.observe_duration();
    metrics::PUT_COUNT.with_label_values(&[&tid_label, &pid_label]).inc();
    guard.finish();
    Ok(offset)
}

pub struct GetRequest {
    pub index_name: String,
    pub pk: Vec<u8>,
    pub ts_idx: u32,
    pub st: i64,
    pub st_type: BoundType,
    pub et: i64,
    pub et_type: BoundType,
    pub want_projection: bool,
    pub row_format: RowFormat,
}

pub fn get(partition: &Partition, req: GetRequest) -> Result<Option<(i64, Vec<u8>)>, ErrorCode> {
    partition.state.require_normal()?;
    if req.want_projection && !req.row_format.supports_projection() {
        return Err(ErrorCode::SQLCompileError);
    }
    let (tid_label, pid_label) = partition.labels();
    let guard = SlowGuard::new(
        SlowOp::Get,
        partition.tid,
        partition.pid,
        Some(&req.pk),
        partition.thresholds.put_slow_log,
        partition.thresholds.query_slow_log,
    );

    let index = partition.table_index.read().clone();
    let def = index.find_by_name(&req.index_name).ok_or(ErrorCode::IdxNameNotFound)?;
    let params = ScanParams {
        ts_idx: req.ts_idx,
        st: req.st,
        st_type: req.st_type,
        et: req.et,
        et_type: req.et_type,
        limit: 1,
        atleast: 0,
        remove_duplicated_record: false,
    };
    let result = partition
        .memtable
        .get(def.inner_pos, &req.pk, &def.ttl, &params)
        .map_err(ErrorCode::from);

    metrics::GET_COUNT.with_label_values(&[&tid_label, &pid_label]).inc();
    guard.finish();
    result
}

pub struct ScanRequest {
    pub index_name: String,
    pub pk: Vec<u8>,
    pub ts_idx: u32,
    pub st: i64,
    pub st_type: BoundType,
    pub et: i64,
    pub et_type: BoundType,
    pub limit: u32,
    pub atleast: u32,
    pub remove_duplicated_record: bool,
}

pub fn scan(partition: &Partition, req: ScanRequest) -> Result<Vec<(i64, Vec<u8>)>, ErrorCode> {
    partition.state.require_normal()?;
    let (tid_label, pid_label) = partition.labels();
    let guard = SlowGuard::new(
        SlowOp::Scan,
        partition.tid,
        partition.pid,
        Some(&req.pk),
        partition.thresholds.put_slow_log,
        partition.thresholds.query_slow_log,
    );

    let index = partition.table_index.read().clone();
    let def = index.find_by_name(&req.index_name).ok_or(ErrorCode::IdxNameNotFound)?;
    let params = ScanParams {
        ts_idx: req.ts_idx,
        st: req.st,
        st_type: req.st_type,
        et: req.et,
        et_type: req.et_type,
        limit: req.limit,
        atleast: req.atleast,
        remove_duplicated_record: req.remove_duplicated_record,
    };
    let rows = partition
        .memtable
        .scan(def.inner_pos, &req.pk, &def.ttl, &params)
        .map_err(ErrorCode::from)?;

    let mut total_bytes = 0u64;
    for (_, value) in &rows {
        total_bytes += value.len() as u64;
        if total_bytes > partition.thresholds.scan_max_bytes_size {
            return Err(ErrorCode::ReachTheScanMaxBytesSize);
        }
    }

    metrics::SCAN_COUNT.with_label_values(&[&tid_label, &pid_label]).inc();
    metrics::SCAN_ROWS.with_label_values(&[&tid_label, &pid_label]).inc_by(rows.len() as u64);
    guard.finish();
    Ok(rows)
}

pub fn count(partition: &Partition, index_name: &str, pk: &[u8], ts_idx: u32, filter_expired: bool) -> Result<u64, ErrorCode> {
    partition.state.require_normal()?;
    let index = partition.table_index.read().clone();
    let def = index.find_by_name(index_name).ok_or(ErrorCode::IdxNameNotFound)?;
    Ok(partition.memtable.count(def.inner_pos, pk, ts_idx, &def.ttl, filter_expired))
}

pub fn traverse(
    partition: &Partition,
    index_name: &str,
    ts_idx: u32,
    cursor: TraverseCursor,
    requested_max: u32,
) -> Result<(Vec<(Vec<u8>, i64, Vec<u8>)>, TraverseCursor, bool), ErrorCode> {
    partition.state.require_normal()?;
    let index = partition.table_index.read().clone();
    let def = index.find_by_name(index_name).ok_or(ErrorCode::IdxNameNotFound)?;
    let max_cnt = requested_max.min(partition.thresholds.max_traverse_cnt).max(1);
    Ok(partition.memtable.traverse(def.inner_pos, ts_idx, cursor, max_cnt))
}

pub fn delete(partition: &Partition, index_name: &str, pk: &[u8], ts_idx: u32, ts: i64) -> Result<bool, ErrorCode> {
    partition.state.require_normal()?;
    partition.require_leader_for_mutation()?;

    let index = partition.table_index.read().clone();
    let def = index.find_by_name(index_name).ok_or(ErrorCode::IdxNameNotFound)?;
    let removed = partition.memtable.delete_ts(def.inner_pos, pk, ts_idx, ts);

    let offset = partition.replicator.next_offset().map_err(|_| ErrorCode::DeleteFailed)?;
    let entry = LogEntry {
        term: partition.replicator.term(),
        offset,
        method: Method::Delete,
        dimensions: vec![LogDimension {
            inner_pos: def.inner_pos,
            key: pk.to_vec(),
        }],
        ts_dimensions: vec![TsDimension { ts_idx, ts }],
        value: vec![],
    };
    partition
        .binlog
        .lock()
        .append(&entry)
        .map_err(|_| ErrorCode::DeleteFailed)?;

    Ok(removed)
}

/// ChangeRole (spec.md §4.5): refuses mid-snapshot, per
/// [`PartitionStateMachine::require_role_changeable`], before flipping the
/// replicator's role.
pub fn change_role(partition: &Partition, role: Role) -> Result<(), ErrorCode> {
    partition.state.require_role_changeable()?;
    partition.replicator.set_role(role);
    Ok(())
}

/// Applies a replicated binlog entry on a follower (spec.md §4.5): the
/// admission check happens in [`Replicator::follower_admit`]; this only
/// mutates the MemTable once admitted.
pub fn apply_replicated_entry(partition: &Partition, entry: &LogEntry) -> Result<(), ErrorCode> {
    partition.replicator.follower_admit(entry.term, entry.offset)?;
    apply_entry(partition, entry);
    Ok(())
}

/// Mutates the MemTable for one log entry, without the replication
/// admission check — shared by [`apply_replicated_entry`] (live replication)
/// and [`crate::partition::recovery::recover`] (loading from snapshot and
/// binlog, where offsets are primed directly rather than admitted one by
/// one).
pub(crate) fn apply_entry(partition: &Partition, entry: &LogEntry) {
    match entry.method {
        Method::Put => {
            let dimensions: Vec<Dimension> = entry
                .dimensions
                .iter()
                .map(|d| Dimension {
                    inner_pos: d.inner_pos,
                    key: d.key.clone(),
                })
                .collect();
            let ts_values: Vec<TsValue> = entry
                .ts_dimensions
                .iter()
                .map(|t| TsValue {
                    ts_idx: t.ts_idx,
                    ts: t.ts,
                })
                .collect();
            partition.memtable.put(&dimensions, &ts_values, &entry.value);
        }
        Method::Delete => {
            for (dim, ts_dim) in entry.dimensions.iter().zip(entry.ts_dimensions.iter()) {
                partition.memtable.delete_ts(dim.inner_pos, &dim.key, ts_dim.ts_idx, ts_dim.ts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablet_commitlog::Options as BinlogOptions;
    use tablet_table::{ColumnKeyDecl, DType, IndexKind, Ttl, TtlKind};

    fn test_partition(dir: &std::path::Path) -> Partition {
        let columns = vec![Column {
            name: "pk".to_owned(),
            id: 0,
            dtype: DType::String,
            not_null: true,
            ts_idx: None,
            legacy_add_ts_idx: false,
            ts_ttl: None,
        }];
        let table_index = TableIndex::build(
            &columns,
            &[],
            Ttl {
                abs_ms: 0,
                lat_count: 0,
                kind: TtlKind::Absolute,
            },
        )
        .unwrap();
        let binlog = Binlog::open(dir, BinlogOptions::default()).unwrap();
        let replicator = Replicator::new(Role::Leader, crate::replicator::AddReplicaPolicy::RejectIfExists);
        Partition::new(
            1,
            0,
            table_index,
            columns,
            binlog,
            replicator,
            1,
            PartitionThresholds {
                put_slow_log: Duration::from_millis(100),
                query_slow_log: Duration::from_millis(100),
                max_traverse_cnt: 1000,
                scan_max_bytes_size: 1024 * 1024,
            },
        )
    }

    fn row_format() -> RowFormat {
        RowFormat {
            format_version: 1,
            compress_type: crate::row::CompressType::None,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let partition = test_partition(dir.path());
        put(
            &partition,
            PutRequest {
                dimensions: vec![("idx0".to_owned(), b"a".to_vec())],
                ts_values: vec![],
                value: b"hello".to_vec(),
                row_format: row_format(),
            },
        )
        .unwrap();

        let got = get(
            &partition,
            GetRequest {
                index_name: "idx0".to_owned(),
                pk: b"a".to_vec(),
                ts_idx: 0,
                st: 0,
                st_type: BoundType::Le,
                et: 0,
                et_type: BoundType::Ge,
                want_projection: false,
                row_format: row_format(),
            },
        )
        .unwrap();
        assert_eq!(got.unwrap().1, b"hello");
    }

    #[test]
    fn non_normal_state_forbids_put() {
        let dir = tempfile::tempdir().unwrap();
        let partition = test_partition(dir.path());
        partition.state.begin_make_snapshot().unwrap();
        let result = put(
            &partition,
            PutRequest {
                dimensions: vec![("idx0".to_owned(), b"a".to_vec())],
                ts_values: vec![],
                value: b"hello".to_vec(),
                row_format: row_format(),
            },
        );
        assert_eq!(result, Err(ErrorCode::TableStatusIsKMakingSnapshot));
    }

    #[test]
    fn follower_role_forbids_client_put() {
        let dir = tempfile::tempdir().unwrap();
        let partition = test_partition(dir.path());
        change_role(&partition, Role::Follower).unwrap();
        let result = put(
            &partition,
            PutRequest {
                dimensions: vec![("idx0".to_owned(), b"a".to_vec())],
                ts_values: vec![],
                value: b"hello".to_vec(),
                row_format: row_format(),
            },
        );
        assert_eq!(result, Err(ErrorCode::TableIsFollower));
    }

    #[test]
    fn change_role_is_refused_mid_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let partition = test_partition(dir.path());
        partition.state.begin_make_snapshot().unwrap();
        assert_eq!(change_role(&partition, Role::Follower).err(), Some(ErrorCode::TableIsLoading));
        assert_eq!(partition.replicator.role(), Role::Leader);
    }

    #[test]
    fn unknown_index_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let partition = test_partition(dir.path());
        let result = put(
            &partition,
            PutRequest {
                dimensions: vec![("missing".to_owned(), b"a".to_vec())],
                ts_values: vec![],
                value: b"hello".to_vec(),
                row_format: row_format(),
            },
        );
        assert_eq!(result, Err(ErrorCode::IdxNameNotFound));
    }
}
