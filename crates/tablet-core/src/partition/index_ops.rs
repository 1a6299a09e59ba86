//! AddIndex/DeleteIndex task orchestration (spec.md §1(e), C8). An added
//! index is published `Waiting`, populated by dumping the default index's
//! rows and loading them into the new index's storage (DumpIndexData +
//! LoadIndexData), then flipped `Ready`. A dropped index is marked
//! `Deleting`, has its rows discarded (ExtractIndexData), then is removed
//! from the schema.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use tablet_commitlog::{Dimension as LogDimension, LogEntry, Method, TsDimension};
use tablet_table::{ColumnKeyDecl, Dimension, IndexStatus, TraverseCursor, Ttl, TtlKind, TsValue};

use crate::error::ErrorCode;
use crate::partition::handlers::Partition;
use crate::task::{TaskInfo, TaskStatus, TaskTracker, TaskType};
use crate::transfer::FileReceiverTable;

const TRAVERSE_PAGE: u32 = 1024;

/// AddIndex, tracked through `tasks` as a `LoadIndexData` sub-task per
/// spec.md §4.8 ("each records terminal status on completion").
pub fn add_index(partition: &Partition, tasks: &TaskTracker, op_id: u64, decl: ColumnKeyDecl) -> Result<(), ErrorCode> {
    let current = partition.table_index.read().clone();
    let table_ttl = current.indexes.first().map(|i| i.ttl).unwrap_or_else(Ttl::none);
    let columns = partition.columns.read().clone();
    let with_new = current
        .with_index_added(&columns, &decl, table_ttl, || partition.memtable.add_inner_index())
        .map_err(ErrorCode::from)?;
    *partition.table_index.write() = Arc::new(with_new);

    tasks.submit(TaskInfo {
        op_id,
        op_type: "AddIndex".to_owned(),
        task_type: TaskType::LoadIndexData,
        task_id: 0,
        status: TaskStatus::Doing,
    })?;
    let result = load_index_data(partition, &decl.name);
    let _ = tasks.set_status(
        op_id,
        TaskType::LoadIndexData,
        0,
        if result.is_ok() { TaskStatus::Done } else { TaskStatus::Failed },
    );
    result?;

    let ready = partition
        .table_index
        .read()
        .with_index_status(&decl.name, IndexStatus::Ready)
        .expect("index was just added above");
    *partition.table_index.write() = Arc::new(ready);
    Ok(())
}

/// DumpIndexData + LoadIndexData: reads the default index's live rows
/// (dump) and re-inserts each under the new index's `(inner_pos, ts_idx)`
/// (load). Modeled as one function since both phases only make sense
/// paired for a single-node recovery of an added index — there is no
/// cross-node transfer involved here, unlike SendSnapshot.
fn load_index_data(partition: &Partition, index_name: &str) -> Result<(), ErrorCode> {
    let index = partition.table_index.read().clone();
    let def = index.find_by_name(index_name).ok_or(ErrorCode::IdxNameNotFound)?;
    let target_inner_pos = def.inner_pos;
    let target_ts_idx = resolve_ts_idx(partition, def.ts_column.as_deref());

    let source = index.indexes.first().ok_or(ErrorCode::TableMetaIsIllegal)?;
    let source_inner_pos = source.inner_pos;
    let source_ts_idx = resolve_ts_idx(partition, source.ts_column.as_deref());

    let mut cursor = TraverseCursor::default();
    loop {
        let (page, next_cursor, done) = partition.memtable.traverse(source_inner_pos, source_ts_idx, cursor, TRAVERSE_PAGE);
        for (pk, ts, value) in page {
            partition.memtable.put(
                &[Dimension {
                    inner_pos: target_inner_pos,
                    key: pk,
                }],
                &[TsValue { ts_idx: target_ts_idx, ts }],
                &value,
            );
        }
        if done {
            break;
        }
        cursor = next_cursor;
    }
    Ok(())
}

/// DeleteIndex, tracked through `tasks` as an `ExtractIndexData` sub-task.
pub fn delete_index(partition: &Partition, tasks: &TaskTracker, op_id: u64, index_name: &str) -> Result<(), ErrorCode> {
    let current = partition.table_index.read().clone();
    if current.indexes.len() <= 1 {
        return Err(ErrorCode::DeleteIndexFailed);
    }
    let deleting = current
        .with_index_status(index_name, IndexStatus::Deleting)
        .ok_or(ErrorCode::IdxNameNotFound)?;
    *partition.table_index.write() = Arc::new(deleting);

    tasks.submit(TaskInfo {
        op_id,
        op_type: "DeleteIndex".to_owned(),
        task_type: TaskType::ExtractIndexData,
        task_id: 0,
        status: TaskStatus::Doing,
    })?;
    let result = extract_index_data(partition, index_name);
    let _ = tasks.set_status(
        op_id,
        TaskType::ExtractIndexData,
        0,
        if result.is_ok() { TaskStatus::Done } else { TaskStatus::Failed },
    );
    result?;

    let current = partition.table_index.read().clone();
    let deleted = current
        .with_index_status(index_name, IndexStatus::Deleted)
        .expect("index still present after extraction");
    let pruned = deleted.without_index(index_name);
    *partition.table_index.write() = Arc::new(pruned);
    Ok(())
}

/// ExtractIndexData: discards every row stored under the index being
/// dropped via a TTL that expires any timestamp, so the inner index's
/// memory is reclaimed before the schema forgets about it.
fn extract_index_data(partition: &Partition, index_name: &str) -> Result<(), ErrorCode> {
    let index = partition.table_index.read().clone();
    let def = index.find_by_name(index_name).ok_or(ErrorCode::IdxNameNotFound)?;
    let ts_idx = resolve_ts_idx(partition, def.ts_column.as_deref());
    let expire_all = Ttl {
        abs_ms: i64::MAX,
        lat_count: 0,
        kind: TtlKind::Absolute,
    };
    partition.memtable.gc(def.inner_pos, ts_idx, &expire_all);
    Ok(())
}

fn resolve_ts_idx(partition: &Partition, ts_column: Option<&str>) -> u32 {
    ts_column
        .and_then(|name| partition.columns.read().iter().find(|c| c.name == name).and_then(|c| c.ts_idx))
        .unwrap_or(0)
}

/// DumpIndexData: serializes `index_name`'s live rows, framed as binlog
/// `Put` entries (the same framing MakeSnapshot uses), to `dest_path` — the
/// file SendIndexData later ships to a sibling replica missing this index.
pub fn dump_index_data(partition: &Partition, index_name: &str, dest_path: &Path) -> Result<u64, ErrorCode> {
    let index = partition.table_index.read().clone();
    let def = index.find_by_name(index_name).ok_or(ErrorCode::IdxNameNotFound)?;
    let ts_idx = resolve_ts_idx(partition, def.ts_column.as_deref());
    let term = partition.replicator.term();
    let offset = partition.replicator.current_offset();

    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent).map_err(|_| ErrorCode::WriteDataFailed)?;
    }
    let mut file = File::create(dest_path).map_err(|_| ErrorCode::WriteDataFailed)?;

    let mut count = 0u64;
    let mut cursor = TraverseCursor::default();
    loop {
        let (page, next_cursor, done) = partition.memtable.traverse(def.inner_pos, ts_idx, cursor, TRAVERSE_PAGE);
        for (pk, ts, value) in page {
            let entry = LogEntry {
                term,
                offset,
                method: Method::Put,
                dimensions: vec![LogDimension { inner_pos: def.inner_pos, key: pk }],
                ts_dimensions: vec![TsDimension { ts_idx, ts }],
                value,
            };
            let mut buf = Vec::new();
            entry.encode(&mut buf);
            file.write_all(&(buf.len() as u32).to_be_bytes()).map_err(|_| ErrorCode::WriteDataFailed)?;
            file.write_all(&buf).map_err(|_| ErrorCode::WriteDataFailed)?;
            count += 1;
        }
        if done {
            break;
        }
        cursor = next_cursor;
    }
    Ok(count)
}

/// LoadIndexData: the replica-side counterpart of [`dump_index_data`] —
/// reads a dumped index file back and loads its rows into `index_name`'s
/// storage.
pub fn load_index_data_from_file(partition: &Partition, index_name: &str, src_path: &Path) -> Result<u64, ErrorCode> {
    let index = partition.table_index.read().clone();
    let def = index.find_by_name(index_name).ok_or(ErrorCode::IdxNameNotFound)?;

    let mut file = File::open(src_path).map_err(|_| ErrorCode::ReceiveDataError)?;
    let mut count = 0u64;
    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(_) => return Err(ErrorCode::ReceiveDataError),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(|_| ErrorCode::ReceiveDataError)?;
        let entry = LogEntry::decode(&buf).map_err(|_| ErrorCode::ReceiveDataError)?;
        for (dim, ts_dim) in entry.dimensions.iter().zip(entry.ts_dimensions.iter()) {
            partition.memtable.put(
                &[Dimension {
                    inner_pos: def.inner_pos,
                    key: dim.key.clone(),
                }],
                &[TsValue {
                    ts_idx: ts_dim.ts_idx,
                    ts: ts_dim.ts,
                }],
                &entry.value,
            );
        }
        count += 1;
    }
    Ok(count)
}

/// SendIndexData: dumps `index_name` to a scratch file (`DumpIndexData`) and
/// ships it to `endpoint` (`SendIndexData`) through the same per-file block
/// receiver mechanism SendSnapshot uses (spec.md §4.5), keyed by
/// `(endpoint, tid, pid, file_name)`.
#[allow(clippy::too_many_arguments)]
pub fn send_index_data(
    partition: &Partition,
    tasks: &TaskTracker,
    op_id: u64,
    receivers: &FileReceiverTable,
    endpoint: &str,
    index_name: &str,
    dest_path: std::path::PathBuf,
    block_size: usize,
) -> Result<u64, ErrorCode> {
    let dump_path = dest_path.with_extension("dump.tmp");

    tasks.submit(TaskInfo {
        op_id,
        op_type: "SendIndexData".to_owned(),
        task_type: TaskType::DumpIndexData,
        task_id: 0,
        status: TaskStatus::Doing,
    })?;
    let dump_result = dump_index_data(partition, index_name, &dump_path);
    let _ = tasks.set_status(
        op_id,
        TaskType::DumpIndexData,
        0,
        if dump_result.is_ok() { TaskStatus::Done } else { TaskStatus::Failed },
    );
    dump_result?;

    tasks.submit(TaskInfo {
        op_id,
        op_type: "SendIndexData".to_owned(),
        task_type: TaskType::SendIndexData,
        task_id: 0,
        status: TaskStatus::Doing,
    })?;
    let send_result = crate::transfer::send_file(
        &partition.replicator,
        receivers,
        endpoint,
        partition.tid,
        partition.pid,
        &dump_path,
        dest_path,
        block_size,
    );
    let _ = std::fs::remove_file(&dump_path);
    let _ = tasks.set_status(
        op_id,
        TaskType::SendIndexData,
        0,
        if send_result.is_ok() { TaskStatus::Done } else { TaskStatus::Failed },
    );
    send_result
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tablet_commitlog::{Binlog, Options as BinlogOptions};
    use tablet_table::{Column, DType, IndexKind, TableIndex};
    use tempfile::tempdir;

    use super::*;
    use crate::partition::handlers::PartitionThresholds;
    use crate::replicator::{AddReplicaPolicy, Replicator, Role};

    fn test_partition(dir: &std::path::Path) -> Partition {
        let columns = vec![
            Column {
                name: "pk".to_owned(),
                id: 0,
                dtype: DType::String,
                not_null: true,
                ts_idx: None,
                legacy_add_ts_idx: false,
                ts_ttl: None,
            },
            Column {
                name: "t".to_owned(),
                id: 1,
                dtype: DType::Int64,
                not_null: false,
                ts_idx: Some(0),
                legacy_add_ts_idx: false,
                ts_ttl: None,
            },
        ];
        let table_index = TableIndex::build(&columns, &[], Ttl::none()).unwrap();
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

    fn decl(name: &str) -> ColumnKeyDecl {
        ColumnKeyDecl {
            name: name.to_owned(),
            kind: IndexKind::Unique,
            key_columns: vec!["pk".to_owned()],
            ts_names: vec!["t".to_owned()],
            ttl: None,
        }
    }

    #[test]
    fn add_index_populates_rows_from_the_default_index_and_goes_ready() {
        let dir = tempdir().unwrap();
        let p = test_partition(dir.path());
        let tasks = TaskTracker::new();
        p.memtable.put(&[Dimension { inner_pos: 0, key: b"a".to_vec() }], &[TsValue { ts_idx: 0, ts: 1 }], b"v1");
        p.memtable.put(&[Dimension { inner_pos: 0, key: b"b".to_vec() }], &[TsValue { ts_idx: 0, ts: 2 }], b"v2");

        add_index(&p, &tasks, 1, decl("idx_new")).unwrap();

        let index = p.table_index.read().clone();
        let added = index.find_by_name("idx_new").unwrap();
        assert_eq!(added.status, IndexStatus::Ready);
        assert_ne!(added.inner_pos, 0, "a fresh key-column set must get a new inner index");
        assert_eq!(tasks.status_of(1, TaskType::LoadIndexData, 0), Some(TaskStatus::Done));

        let (page, _, done) = p.memtable.traverse(added.inner_pos, 0, TraverseCursor::default(), 10);
        assert!(done);
        assert_eq!(page.len(), 2, "both rows from the default index must have been loaded");
    }

    #[test]
    fn add_index_rejects_duplicate_name() {
        let dir = tempdir().unwrap();
        let p = test_partition(dir.path());
        let tasks = TaskTracker::new();
        add_index(&p, &tasks, 1, decl("idx_new")).unwrap();
        assert_eq!(add_index(&p, &tasks, 2, decl("idx_new")).err(), Some(ErrorCode::AddIndexFailed));
    }

    #[test]
    fn delete_index_removes_it_and_discards_its_rows() {
        let dir = tempdir().unwrap();
        let p = test_partition(dir.path());
        let tasks = TaskTracker::new();
        p.memtable.put(&[Dimension { inner_pos: 0, key: b"a".to_vec() }], &[TsValue { ts_idx: 0, ts: 1 }], b"v1");
        add_index(&p, &tasks, 1, decl("idx_new")).unwrap();
        let inner_pos = p.table_index.read().find_by_name("idx_new").unwrap().inner_pos;

        delete_index(&p, &tasks, 2, "idx_new").unwrap();

        assert!(p.table_index.read().find_by_name("idx_new").is_none());
        assert_eq!(tasks.status_of(2, TaskType::ExtractIndexData, 0), Some(TaskStatus::Done));
        let (page, _, done) = p.memtable.traverse(inner_pos, 0, TraverseCursor::default(), 10);
        assert!(done);
        assert!(page.is_empty(), "deleted index's rows must be gone");
    }

    #[test]
    fn delete_index_refuses_to_remove_the_last_index() {
        let dir = tempdir().unwrap();
        let p = test_partition(dir.path());
        let tasks = TaskTracker::new();
        assert_eq!(delete_index(&p, &tasks, 1, "idx0").err(), Some(ErrorCode::DeleteIndexFailed));
    }

    #[test]
    fn dump_and_load_index_data_round_trips_rows_into_a_second_index() {
        let dir = tempdir().unwrap();
        let p = test_partition(dir.path());
        let tasks = TaskTracker::new();
        p.memtable.put(&[Dimension { inner_pos: 0, key: b"a".to_vec() }], &[TsValue { ts_idx: 0, ts: 1 }], b"v1");
        p.memtable.put(&[Dimension { inner_pos: 0, key: b"b".to_vec() }], &[TsValue { ts_idx: 0, ts: 2 }], b"v2");
        add_index(&p, &tasks, 1, decl("idx_new")).unwrap();
        let inner_pos = p.table_index.read().find_by_name("idx_new").unwrap().inner_pos;

        let dump_path = dir.path().join("idx_new.dump");
        let dumped = dump_index_data(&p, "idx_new", &dump_path).unwrap();
        assert_eq!(dumped, 2);

        delete_index(&p, &tasks, 2, "idx_new").unwrap();
        assert!(p.memtable.traverse(inner_pos, 0, TraverseCursor::default(), 10).0.is_empty());

        add_index(&p, &tasks, 3, decl("idx_new")).unwrap();
        let reloaded_inner_pos = p.table_index.read().find_by_name("idx_new").unwrap().inner_pos;
        let loaded = load_index_data_from_file(&p, "idx_new", &dump_path).unwrap();
        assert_eq!(loaded, 2);
        let (page, _, done) = p.memtable.traverse(reloaded_inner_pos, 0, TraverseCursor::default(), 10);
        assert!(done);
        assert_eq!(page.len(), 2, "rows read back from the dump file must have been re-applied");
    }

    #[test]
    fn send_index_data_tracks_dump_and_send_tasks_and_delivers_the_file() {
        let dir = tempdir().unwrap();
        let p = test_partition(dir.path());
        let tasks = TaskTracker::new();
        p.memtable.put(&[Dimension { inner_pos: 0, key: b"a".to_vec() }], &[TsValue { ts_idx: 0, ts: 1 }], b"v1");
        add_index(&p, &tasks, 1, decl("idx_new")).unwrap();

        let receivers = FileReceiverTable::new();
        let dest_path = dir.path().join("received.dump");
        let sent = send_index_data(&p, &tasks, 2, &receivers, "node-a", "idx_new", dest_path.clone(), 4096).unwrap();
        assert_eq!(sent, 1);
        assert_eq!(tasks.status_of(2, TaskType::DumpIndexData, 0), Some(TaskStatus::Done));
        assert_eq!(tasks.status_of(2, TaskType::SendIndexData, 0), Some(TaskStatus::Done));
        assert!(dest_path.exists());
    }
}
