//! Leader/follower replication (spec.md §4.5, C5).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// Policy toggle for the `AddReplica`-on-existing-endpoint open question
/// (spec.md §9): both "idempotent success" and "distinct error" are observed
/// in the system this is modeled on, so callers pick one per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddReplicaPolicy {
    /// Re-adding an existing endpoint returns `ReplicaEndpointAlreadyExists`.
    RejectIfExists,
    /// Re-adding an existing endpoint is a no-op success.
    IdempotentOk,
}

/// The leader's view of the binlog file set: the starting offset of each
/// segment, so binlog GC and snapshot bookkeeping don't need to re-scan the
/// directory (spec.md §4.3 "LogPart index").
#[derive(Debug, Clone, Default)]
pub struct LogPartIndex {
    starting_offsets: Vec<u64>,
}

impl LogPartIndex {
    pub fn record_segment(&mut self, start_offset: u64) {
        self.starting_offsets.push(start_offset);
    }

    /// Offsets of segments fully covered by (i.e. whose max offset is) below
    /// `retain_from`.
    pub fn segments_below(&self, retain_from: u64) -> impl Iterator<Item = u64> + '_ {
        self.starting_offsets.windows(2).filter_map(move |w| {
            let (start, next_start) = (w[0], w[1]);
            (next_start <= retain_from).then_some(start)
        })
    }
}

pub struct ReplicaHandle {
    pub endpoint: String,
    acked_offset: AtomicU64,
}

impl ReplicaHandle {
    pub fn acked_offset(&self) -> u64 {
        self.acked_offset.load(Ordering::Acquire)
    }
}

/// A transfer key: `(endpoint, tid, pid, file_name)`. The file-receiver
/// table is single-writer per key (spec.md §5).
pub type TransferKey = (String, u32, u32, String);

pub struct Replicator {
    role: RwLock<Role>,
    /// Only meaningful when cluster mode is enabled; zero otherwise.
    term: AtomicU64,
    current_offset: AtomicU64,
    follower_mode: std::sync::atomic::AtomicBool,
    log_part_index: RwLock<LogPartIndex>,
    replicas: RwLock<HashMap<String, Arc<ReplicaHandle>>>,
    add_replica_policy: AddReplicaPolicy,
    active_transfers: Mutex<HashSet<TransferKey>>,
}

impl Replicator {
    pub fn new(role: Role, add_replica_policy: AddReplicaPolicy) -> Self {
        Self {
            role: RwLock::new(role),
            term: AtomicU64::new(0),
            current_offset: AtomicU64::new(0),
            follower_mode: std::sync::atomic::AtomicBool::new(false),
            log_part_index: RwLock::new(LogPartIndex::default()),
            replicas: RwLock::new(HashMap::new()),
            add_replica_policy,
            active_transfers: Mutex::new(HashSet::new()),
        }
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    pub fn set_role(&self, role: Role) {
        *self.role.write() = role;
    }

    pub fn set_follower_cluster_mode(&self, enabled: bool) {
        self.follower_mode.store(enabled, Ordering::Release);
    }

    /// Node-wide read-only stance: rejects mutation RPCs regardless of
    /// per-partition role (spec.md §5 glossary "Follower cluster mode").
    pub fn is_follower_cluster(&self) -> bool {
        self.follower_mode.load(Ordering::Acquire)
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset.load(Ordering::Acquire)
    }

    pub fn term(&self) -> u64 {
        self.term.load(Ordering::Acquire)
    }

    pub fn set_term(&self, term: u64) {
        self.term.store(term, Ordering::Release);
    }

    /// Fast-forwards `current_offset` without going through
    /// [`Self::follower_admit`]'s gap check — used once at the end of
    /// recovery (spec.md §8), after entries have been applied to the
    /// MemTable directly from the snapshot and binlog tail.
    pub fn set_current_offset(&self, offset: u64) {
        self.current_offset.store(offset, Ordering::Release);
    }

    /// Leader-side: obtain the next strictly-monotonic offset for a write.
    pub fn next_offset(&self) -> Result<u64, ErrorCode> {
        if *self.role.read() != Role::Leader {
            return Err(ErrorCode::ReplicatorRoleIsNotLeader);
        }
        Ok(self.current_offset.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Follower-side: the `AppendEntries` admission check (spec.md §4.5).
    /// Rejects a stale term or an offset gap; on success, advances
    /// `current_offset` to `entry_offset`.
    pub fn follower_admit(&self, entry_term: u64, entry_offset: u64) -> Result<(), ErrorCode> {
        let current_term = self.term();
        if entry_term != 0 && entry_term < current_term {
            return Err(ErrorCode::ReplicatorRoleIsNotLeader);
        }
        let expected = self.current_offset() + 1;
        if entry_offset != expected {
            return Err(ErrorCode::InvalidParameter);
        }
        self.current_offset.store(entry_offset, Ordering::Release);
        Ok(())
    }

    pub fn add_replica(&self, endpoint: &str) -> Result<(), ErrorCode> {
        let mut replicas = self.replicas.write();
        if replicas.contains_key(endpoint) {
            return match self.add_replica_policy {
                AddReplicaPolicy::RejectIfExists => Err(ErrorCode::ReplicaEndpointAlreadyExists),
                AddReplicaPolicy::IdempotentOk => Ok(()),
            };
        }
        replicas.insert(
            endpoint.to_owned(),
            Arc::new(ReplicaHandle {
                endpoint: endpoint.to_owned(),
                acked_offset: AtomicU64::new(0),
            }),
        );
        Ok(())
    }

    pub fn del_replica(&self, endpoint: &str) -> Result<(), ErrorCode> {
        self.replicas
            .write()
            .remove(endpoint)
            .map(|_| ())
            .ok_or(ErrorCode::ReplicatorIsNotExist)
    }

    pub fn replica(&self, endpoint: &str) -> Option<Arc<ReplicaHandle>> {
        self.replicas.read().get(endpoint).cloned()
    }

    pub fn ack_offset(&self, endpoint: &str, offset: u64) -> Result<(), ErrorCode> {
        let replicas = self.replicas.read();
        let handle = replicas.get(endpoint).ok_or(ErrorCode::ReplicatorIsNotExist)?;
        handle.acked_offset.store(offset, Ordering::Release);
        Ok(())
    }

    pub fn has_follower(&self) -> bool {
        !self.replicas.read().is_empty()
    }

    pub fn record_segment(&self, start_offset: u64) {
        self.log_part_index.write().record_segment(start_offset);
    }

    pub fn log_part_offsets_below(&self, retain_from: u64) -> Vec<u64> {
        self.log_part_index.read().segments_below(retain_from).collect()
    }

    /// Begins a three-file snapshot transfer (`table_meta.txt`, data file,
    /// MANIFEST) to `endpoint`; refuses a second concurrent transfer of the
    /// same `(tid,pid)` snapshot file.
    pub fn begin_transfer(&self, key: TransferKey) -> Result<TransferGuard<'_>, ErrorCode> {
        let mut transfers = self.active_transfers.lock();
        if !transfers.insert(key.clone()) {
            return Err(ErrorCode::SnapshotIsSending);
        }
        Ok(TransferGuard {
            replicator: self,
            key: Some(key),
        })
    }
}

/// RAII guard releasing a transfer key on drop (success or failure alike).
pub struct TransferGuard<'a> {
    replicator: &'a Replicator,
    key: Option<TransferKey>,
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.replicator.active_transfers.lock().remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_replica_reject_policy_returns_error_on_second_add() {
        let r = Replicator::new(Role::Leader, AddReplicaPolicy::RejectIfExists);
        r.add_replica("node-2").unwrap();
        assert_eq!(r.add_replica("node-2"), Err(ErrorCode::ReplicaEndpointAlreadyExists));
    }

    #[test]
    fn add_replica_idempotent_policy_is_a_no_op() {
        let r = Replicator::new(Role::Leader, AddReplicaPolicy::IdempotentOk);
        r.add_replica("node-2").unwrap();
        assert!(r.add_replica("node-2").is_ok());
    }

    #[test]
    fn follower_rejects_offset_gap() {
        let r = Replicator::new(Role::Follower, AddReplicaPolicy::RejectIfExists);
        r.follower_admit(0, 1).unwrap();
        assert!(r.follower_admit(0, 5).is_err());
        assert!(r.follower_admit(0, 2).is_ok());
    }

    #[test]
    fn replication_lag_scenario() {
        let r = Replicator::new(Role::Leader, AddReplicaPolicy::RejectIfExists);
        r.add_replica("follower-1").unwrap();
        for _ in 0..100 {
            r.next_offset().unwrap();
        }
        r.ack_offset("follower-1", 80).unwrap();
        assert_eq!(r.replica("follower-1").unwrap().acked_offset(), 80);
        r.ack_offset("follower-1", 100).unwrap();
        assert_eq!(r.replica("follower-1").unwrap().acked_offset(), 100);
    }

    #[test]
    fn concurrent_transfer_of_same_snapshot_is_refused() {
        let r = Replicator::new(Role::Leader, AddReplicaPolicy::RejectIfExists);
        let key: TransferKey = ("node-2".to_owned(), 1, 0, "snap.sdb".to_owned());
        let guard = r.begin_transfer(key.clone()).unwrap();
        assert!(r.begin_transfer(key.clone()).is_err());
        drop(guard);
        assert!(r.begin_transfer(key).is_ok());
    }
}
