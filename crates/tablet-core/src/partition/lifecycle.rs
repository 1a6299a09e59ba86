//! Per-`(tid,pid)` partition state machine (spec.md §4.6, C6).

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PartitionState {
    Loading = 0,
    Normal = 1,
    MakingSnapshot = 2,
    SnapshotPaused = 3,
    Undefined = 4,
}

impl PartitionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PartitionState::Loading,
            1 => PartitionState::Normal,
            2 => PartitionState::MakingSnapshot,
            3 => PartitionState::SnapshotPaused,
            _ => PartitionState::Undefined,
        }
    }
}

/// Atomic state holder with check-and-set transitions guarded by the
/// caller's partition-registry lock (spec.md §5 "each partition's state is
/// an atomic field; transitions check-and-set under the spin mutex").
pub struct PartitionStateMachine {
    state: AtomicU8,
}

impl PartitionStateMachine {
    pub fn new(initial: PartitionState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
        }
    }

    pub fn get(&self) -> PartitionState {
        PartitionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: PartitionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Moves `Normal -> MakingSnapshot`; fails if not currently `Normal`
    /// (spec.md §4.4 "Requires partition state == Normal").
    pub fn begin_make_snapshot(&self) -> Result<(), ErrorCode> {
        self.transition(PartitionState::Normal, PartitionState::MakingSnapshot)
    }

    /// Restores `Normal` after a snapshot attempt, success or failure alike.
    pub fn end_make_snapshot(&self) {
        self.set(PartitionState::Normal);
    }

    pub fn begin_snapshot_pause(&self) -> Result<(), ErrorCode> {
        self.transition(PartitionState::Normal, PartitionState::SnapshotPaused)
    }

    pub fn end_snapshot_pause(&self) {
        self.set(PartitionState::Normal);
    }

    pub fn finish_loading(&self) {
        self.set(PartitionState::Normal);
    }

    /// `state != Normal` forbids Put, Scan, Get, Count (spec.md §4.6).
    pub fn require_normal(&self) -> Result<(), ErrorCode> {
        match self.get() {
            PartitionState::Normal => Ok(()),
            PartitionState::MakingSnapshot => Err(ErrorCode::TableStatusIsKMakingSnapshot),
            PartitionState::Loading => Err(ErrorCode::TableIsLoading),
            _ => Err(ErrorCode::TableStatusIsNotNormal),
        }
    }

    /// `MakingSnapshot` forbids Drop.
    pub fn require_droppable(&self) -> Result<(), ErrorCode> {
        if self.get() == PartitionState::MakingSnapshot {
            return Err(ErrorCode::TableStatusIsKMakingSnapshot);
        }
        Ok(())
    }

    /// `Loading` forbids role change; role change is otherwise only valid
    /// in `Normal`.
    pub fn require_role_changeable(&self) -> Result<(), ErrorCode> {
        if self.get() == PartitionState::Normal {
            Ok(())
        } else {
            Err(ErrorCode::TableIsLoading)
        }
    }

    /// `SnapshotPaused` is required before `SendSnapshot`.
    pub fn require_snapshot_paused(&self) -> Result<(), ErrorCode> {
        if self.get() == PartitionState::SnapshotPaused {
            Ok(())
        } else {
            Err(ErrorCode::TableStatusIsNotKSnapshotPaused)
        }
    }

    fn transition(&self, from: PartitionState, to: PartitionState) -> Result<(), ErrorCode> {
        let current = self.state.compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match current {
            Ok(_) => Ok(()),
            Err(observed) => match PartitionState::from_u8(observed) {
                PartitionState::MakingSnapshot => Err(ErrorCode::TableStatusIsKMakingSnapshot),
                PartitionState::Loading => Err(ErrorCode::TableIsLoading),
                _ => Err(ErrorCode::TableStatusIsNotNormal),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_allows_snapshot_then_restores() {
        let sm = PartitionStateMachine::new(PartitionState::Normal);
        sm.begin_make_snapshot().unwrap();
        assert_eq!(sm.get(), PartitionState::MakingSnapshot);
        assert!(sm.require_normal().is_err());
        sm.end_make_snapshot();
        assert_eq!(sm.get(), PartitionState::Normal);
    }

    #[test]
    fn making_snapshot_forbids_drop() {
        let sm = PartitionStateMachine::new(PartitionState::Normal);
        sm.begin_make_snapshot().unwrap();
        assert!(sm.require_droppable().is_err());
    }

    #[test]
    fn loading_forbids_role_change() {
        let sm = PartitionStateMachine::new(PartitionState::Loading);
        assert!(sm.require_role_changeable().is_err());
        sm.finish_loading();
        assert!(sm.require_role_changeable().is_ok());
    }

    #[test]
    fn send_snapshot_requires_paused() {
        let sm = PartitionStateMachine::new(PartitionState::Normal);
        assert!(sm.require_snapshot_paused().is_err());
        sm.begin_snapshot_pause().unwrap();
        assert!(sm.require_snapshot_paused().is_ok());
    }
}
