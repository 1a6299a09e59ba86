//! Node-wide partition registry (spec.md §5 "tables_, replicators_,
//! snapshots_ ... protected by a spin mutex"). `parking_lot::RwLock` plays
//! the role of the teacher's spin mutex here: short critical sections,
//! never held across I/O.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ErrorCode;
use crate::partition::handlers::Partition;

/// Live partitions keyed by `(tid, pid)`. One registry per node process.
#[derive(Default)]
pub struct PartitionRegistry {
    partitions: RwLock<HashMap<(u32, u32), Arc<Partition>>>,
}

impl PartitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `CreateTable`/`LoadTable`: fails if the `(tid,pid)` is already present
    /// (spec.md §4.6 "Create/Load" — a second Create on a live partition is
    /// `TableAlreadyExists`, never a silent replace).
    pub fn insert(&self, partition: Partition) -> Result<Arc<Partition>, ErrorCode> {
        let key = (partition.tid, partition.pid);
        let mut partitions = self.partitions.write();
        if partitions.contains_key(&key) {
            return Err(ErrorCode::TableAlreadyExists);
        }
        let handle = Arc::new(partition);
        partitions.insert(key, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, tid: u32, pid: u32) -> Result<Arc<Partition>, ErrorCode> {
        self.partitions.read().get(&(tid, pid)).cloned().ok_or(ErrorCode::TableIsNotExist)
    }

    /// `DropTable`: the partition must be droppable per its state machine
    /// (spec.md §4.6); the caller is responsible for recycling its on-disk
    /// directory after this returns.
    pub fn remove(&self, tid: u32, pid: u32) -> Result<Arc<Partition>, ErrorCode> {
        let partition = self.get(tid, pid)?;
        partition.state.require_droppable()?;
        self.partitions.write().remove(&(tid, pid));
        Ok(partition)
    }

    pub fn partition_keys(&self) -> Vec<(u32, u32)> {
        self.partitions.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.partitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tablet_commitlog::{Binlog, Options as BinlogOptions};
    use tablet_table::{Column, DType, TableIndex, Ttl, TtlKind};

    use super::*;
    use crate::partition::handlers::PartitionThresholds;
    use crate::replicator::{AddReplicaPolicy, Replicator, Role};

    fn partition(dir: &std::path::Path, tid: u32, pid: u32) -> Partition {
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
            tid,
            pid,
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
    fn duplicate_insert_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PartitionRegistry::new();
        registry.insert(partition(dir.path(), 1, 0)).unwrap();
        let dir2 = tempfile::tempdir().unwrap();
        assert_eq!(
            registry.insert(partition(dir2.path(), 1, 0)).err(),
            Some(ErrorCode::TableAlreadyExists)
        );
    }

    #[test]
    fn remove_requires_droppable_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PartitionRegistry::new();
        let handle = registry.insert(partition(dir.path(), 1, 0)).unwrap();
        handle.state.begin_make_snapshot().unwrap();
        assert!(registry.remove(1, 0).is_err());
        handle.state.end_make_snapshot();
        assert!(registry.remove(1, 0).is_ok());
        assert_eq!(registry.get(1, 0).err(), Some(ErrorCode::TableIsNotExist));
    }
}
