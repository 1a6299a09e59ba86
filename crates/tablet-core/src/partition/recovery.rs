//! Load/Recover composition (spec.md §8 "Recovery equivalence"): apply the
//! latest snapshot, then replay whatever binlog entries follow its offset,
//! so the resulting MemTable matches replaying the full binlog from
//! scratch. This is the one place [`SnapshotRepository::recover_rows`] and
//! [`tablet_commitlog::BinlogReader`] are driven together.

use tablet_commitlog::{LogEntry, ReadStatus};
use tablet_snapshot::{SnapshotCompression, SnapshotRepository};

use crate::error::ErrorCode;
use crate::partition::handlers::{apply_entry, Partition};

/// Moves `partition` from `Loading` to `Normal`: applies every row in
/// `snapshot`'s current manifest (if any), then replays the partition's own
/// binlog forward from the snapshot's offset. Always ends in `Normal`, even
/// when there is no snapshot yet (an empty MANIFEST means "replay the whole
/// binlog", per spec.md §8 Scenario 1).
///
/// Callers hold `partition` exclusively during recovery (it isn't registered
/// in the [`crate::registry::PartitionRegistry`] yet, or is still `Loading`
/// if it is), so `Put`/`Scan`/etc cannot race this function.
pub fn recover(partition: &Partition, snapshot: &SnapshotRepository, compression: SnapshotCompression) -> Result<(), ErrorCode> {
    let (manifest, rows) = snapshot.recover_rows(compression).map_err(|_| ErrorCode::CreateTableFailed)?;

    for row in &rows {
        let entry = LogEntry::decode(row).map_err(|_| ErrorCode::CreateTableFailed)?;
        apply_entry(partition, &entry);
    }

    let resume_from = manifest.as_ref().map(|m| m.offset + 1).unwrap_or(0);
    let mut last_term = manifest.as_ref().map(|m| m.term).unwrap_or(0);
    let mut last_offset = manifest.as_ref().map(|m| m.offset);

    let mut reader = partition
        .binlog
        .lock()
        .open_reader(resume_from)
        .map_err(|_| ErrorCode::CreateTableFailed)?;
    loop {
        match reader.read_next().map_err(|_| ErrorCode::CreateTableFailed)? {
            ReadStatus::Ok(entry) => {
                last_term = entry.term;
                last_offset = Some(entry.offset);
                apply_entry(partition, &entry);
            }
            ReadStatus::WaitRecord | ReadStatus::Eof => break,
            // A torn/corrupt tail record stops replay where the corruption
            // starts; everything before it is still applied.
            ReadStatus::Corruption(_) => break,
        }
    }

    partition.replicator.set_term(last_term);
    if let Some(offset) = last_offset {
        partition.replicator.set_current_offset(offset);
    }
    partition.state.finish_loading();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tablet_commitlog::{Binlog, Dimension as LogDimension, Method, Options as BinlogOptions, TsDimension};
    use tablet_table::{Column, DType, TableIndex, Ttl, TtlKind};

    use super::*;
    use crate::partition::handlers::PartitionThresholds;
    use crate::replicator::{AddReplicaPolicy, Replicator, Role};

    fn columns() -> Vec<Column> {
        vec![Column {
            name: "pk".to_owned(),
            id: 0,
            dtype: DType::String,
            not_null: true,
            ts_idx: None,
            legacy_add_ts_idx: false,
            ts_ttl: None,
        }]
    }

    fn thresholds() -> PartitionThresholds {
        PartitionThresholds {
            put_slow_log: Duration::from_millis(100),
            query_slow_log: Duration::from_millis(100),
            max_traverse_cnt: 1000,
            scan_max_bytes_size: 1024 * 1024,
        }
    }

    fn loading_partition(dir: &std::path::Path) -> Partition {
        let columns = columns();
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
        Partition::new_loading(1, 0, table_index, columns, binlog, replicator, 1, thresholds())
    }

    fn put_entry(offset: u64, key: &[u8], ts: i64, value: &[u8]) -> LogEntry {
        LogEntry {
            term: 1,
            offset,
            method: Method::Put,
            dimensions: vec![LogDimension {
                inner_pos: 0,
                key: key.to_vec(),
            }],
            ts_dimensions: vec![TsDimension { ts_idx: 0, ts }],
            value: value.to_vec(),
        }
    }

    #[test]
    fn recover_with_no_snapshot_replays_full_binlog() {
        let dir = tempfile::tempdir().unwrap();
        let partition = loading_partition(dir.path());
        partition.binlog.lock().append(&put_entry(1, b"a", 10, b"v1")).unwrap();
        partition.binlog.lock().append(&put_entry(2, b"a", 20, b"v2")).unwrap();

        let snap_dir = tempfile::tempdir().unwrap();
        let repo = SnapshotRepository::open(snap_dir.path()).unwrap();

        recover(&partition, &repo, SnapshotCompression::Off).unwrap();

        assert_eq!(partition.state.get(), crate::partition::lifecycle::PartitionState::Normal);
        let scanned = partition
            .memtable
            .scan(
                0,
                b"a",
                &Ttl::none(),
                &tablet_table::ScanParams {
                    ts_idx: 0,
                    st: 0,
                    st_type: tablet_table::BoundType::Le,
                    et: 0,
                    et_type: tablet_table::BoundType::Ge,
                    limit: 0,
                    atleast: 0,
                    remove_duplicated_record: false,
                },
            )
            .unwrap();
        assert_eq!(scanned, vec![(20, b"v2".to_vec()), (10, b"v1".to_vec())]);
        assert_eq!(partition.replicator.current_offset(), 2);
    }

    #[test]
    fn recover_applies_snapshot_then_replays_only_newer_binlog_entries() {
        let dir = tempfile::tempdir().unwrap();
        let partition = loading_partition(dir.path());
        partition.binlog.lock().append(&put_entry(1, b"a", 10, b"snapshotted")).unwrap();
        partition.binlog.lock().append(&put_entry(2, b"a", 20, b"after-snapshot")).unwrap();

        let snap_dir = tempfile::tempdir().unwrap();
        let repo = SnapshotRepository::open(snap_dir.path()).unwrap();
        let mut encoded = Vec::new();
        put_entry(1, b"a", 10, b"snapshotted").encode(&mut encoded);
        repo.make_snapshot(std::iter::once(encoded.as_slice()), 1, 1, SnapshotCompression::Off).unwrap();

        recover(&partition, &repo, SnapshotCompression::Off).unwrap();

        let scanned = partition
            .memtable
            .scan(
                0,
                b"a",
                &Ttl::none(),
                &tablet_table::ScanParams {
                    ts_idx: 0,
                    st: 0,
                    st_type: tablet_table::BoundType::Le,
                    et: 0,
                    et_type: tablet_table::BoundType::Ge,
                    limit: 0,
                    atleast: 0,
                    remove_duplicated_record: false,
                },
            )
            .unwrap();
        assert_eq!(scanned, vec![(20, b"after-snapshot".to_vec()), (10, b"snapshotted".to_vec())]);
        assert_eq!(partition.replicator.current_offset(), 2);
    }
}
