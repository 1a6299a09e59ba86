//! MakeSnapshot orchestration (spec.md §4.4, C4): ties the partition state
//! machine to [`SnapshotRepository::make_snapshot`], gated by
//! `make_snapshot_threshold_offset` (spec.md §8 Scenario 5 "threshold skip
//! returns Ok but produces no new file").

use tablet_commitlog::{Dimension as LogDimension, LogEntry, Method, TsDimension};
use tablet_snapshot::{Manifest, SnapshotCompression, SnapshotRepository};
use tablet_table::TraverseCursor;

use crate::error::ErrorCode;
use crate::partition::handlers::Partition;

const TRAVERSE_PAGE: u32 = 1024;

/// Builds a new snapshot of `partition`'s default index and publishes it
/// through `repo`. A no-op (`Ok(None)`) when the binlog has advanced less
/// than `threshold_offset` since the last manifest, so a scheduler can call
/// this on every tick without forcing a snapshot each time.
pub fn make_snapshot(
    partition: &Partition,
    repo: &SnapshotRepository,
    compression: SnapshotCompression,
    threshold_offset: u64,
) -> Result<Option<Manifest>, ErrorCode> {
    let current_offset = partition.replicator.current_offset();
    let last_manifest = repo.latest_manifest().map_err(|_| ErrorCode::CreateTableFailed)?;
    if let Some(m) = &last_manifest {
        if current_offset.saturating_sub(m.offset) < threshold_offset {
            return Ok(None);
        }
    }

    partition.state.begin_make_snapshot()?;
    let result: Result<Manifest, ErrorCode> = (|| {
        let term = partition.replicator.term();
        let index = partition.table_index.read().clone();
        let inner_pos = index.indexes.first().ok_or(ErrorCode::TableMetaIsIllegal)?.inner_pos;
        let rows = dump_default_index(partition)?;
        let encoded: Vec<Vec<u8>> = rows
            .into_iter()
            .map(|(pk, ts, value)| {
                let entry = LogEntry {
                    term,
                    offset: current_offset,
                    method: Method::Put,
                    dimensions: vec![LogDimension { inner_pos, key: pk }],
                    ts_dimensions: vec![TsDimension { ts_idx: 0, ts }],
                    value,
                };
                let mut buf = Vec::new();
                entry.encode(&mut buf);
                buf
            })
            .collect();
        repo.make_snapshot(encoded.iter().map(|e| e.as_slice()), current_offset, term, compression)
            .map_err(|_| ErrorCode::CreateTableFailed)
    })();
    // Snapshotting never leaves the partition MakingSnapshot, success or not.
    partition.state.end_make_snapshot();

    let manifest = result?;
    // Entries at or before the snapshotted offset are now redundant; mark
    // where the next not-yet-snapshotted binlog segment begins so GC can
    // eventually reclaim them.
    partition.replicator.record_segment(manifest.offset + 1);
    Ok(Some(manifest))
}

fn dump_default_index(partition: &Partition) -> Result<Vec<(Vec<u8>, i64, Vec<u8>)>, ErrorCode> {
    let index = partition.table_index.read().clone();
    let def = index.indexes.first().ok_or(ErrorCode::TableMetaIsIllegal)?;
    let ts_idx = def
        .ts_column
        .as_deref()
        .and_then(|name| partition.columns.read().iter().find(|c| c.name == name).and_then(|c| c.ts_idx))
        .unwrap_or(0);

    let mut all = Vec::new();
    let mut cursor = TraverseCursor::default();
    loop {
        let (page, next_cursor, is_finished) = partition.memtable.traverse(def.inner_pos, ts_idx, cursor, TRAVERSE_PAGE);
        all.extend(page);
        if is_finished {
            break;
        }
        cursor = next_cursor;
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tablet_commitlog::{Binlog, Options as BinlogOptions};
    use tablet_table::{Column, DType, Dimension, TableIndex, TsValue, Ttl, TtlKind};
    use tempfile::tempdir;

    use super::*;
    use crate::partition::handlers::PartitionThresholds;
    use crate::replicator::{AddReplicaPolicy, Replicator, Role};

    fn partition(dir: &std::path::Path) -> Partition {
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
        let replicator = Replicator::new(Role::Leader, AddReplicaPolicy::RejectIfExists);
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

    #[test]
    fn below_threshold_is_a_no_op() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path());
        p.memtable.put(&[Dimension { inner_pos: 0, key: b"a".to_vec() }], &[TsValue { ts_idx: 0, ts: 1 }], b"v");
        p.replicator.next_offset().unwrap();

        let snap_dir = tempdir().unwrap();
        let repo = SnapshotRepository::open(snap_dir.path()).unwrap();
        repo.make_snapshot(std::iter::empty(), p.replicator.current_offset(), 0, SnapshotCompression::Off).unwrap();

        let result = make_snapshot(&p, &repo, SnapshotCompression::Off, 100).unwrap();
        assert!(result.is_none());
        assert_eq!(p.state.get(), crate::partition::lifecycle::PartitionState::Normal);
    }

    #[test]
    fn over_threshold_produces_a_new_manifest_and_restores_normal() {
        let dir = tempdir().unwrap();
        let p = partition(dir.path());
        p.memtable.put(&[Dimension { inner_pos: 0, key: b"a".to_vec() }], &[TsValue { ts_idx: 0, ts: 1 }], b"v1");
        p.memtable.put(&[Dimension { inner_pos: 0, key: b"b".to_vec() }], &[TsValue { ts_idx: 0, ts: 2 }], b"v2");
        for _ in 0..5 {
            p.replicator.next_offset().unwrap();
        }

        let snap_dir = tempdir().unwrap();
        let repo = SnapshotRepository::open(snap_dir.path()).unwrap();

        let manifest = make_snapshot(&p, &repo, SnapshotCompression::Off, 1).unwrap();
        assert!(manifest.is_some());
        assert_eq!(manifest.unwrap().record_count, 2);
        assert_eq!(p.state.get(), crate::partition::lifecycle::PartitionState::Normal);
    }
}
