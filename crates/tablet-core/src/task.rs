//! External task intake and status tracking (spec.md §4.8, C8).

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    MakeSnapshot,
    SendSnapshot,
    LoadTable,
    DropTable,
    PauseSnapshot,
    RecoverSnapshot,
    AddReplica,
    DelReplica,
    DumpIndexData,
    LoadIndexData,
    SendIndexData,
    ExtractIndexData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Doing,
    Done,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Canceled)
    }
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub op_id: u64,
    pub op_type: String,
    pub task_type: TaskType,
    /// Distinguishes sibling tasks of the same type within one multi-task OP.
    pub task_id: u64,
    pub status: TaskStatus,
}

/// Keyed by `op_id`; a single OP may carry a list of tasks (spec.md §4.8).
#[derive(Default)]
pub struct TaskTracker {
    ops: Mutex<HashMap<u64, Vec<TaskInfo>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects intake if a task with the same `(op_id, task_type, task_id)`
    /// is already `Doing`.
    pub fn submit(&self, task: TaskInfo) -> Result<(), ErrorCode> {
        let mut ops = self.ops.lock();
        let tasks = ops.entry(task.op_id).or_default();
        if tasks
            .iter()
            .any(|t| t.task_type == task.task_type && t.task_id == task.task_id && t.status == TaskStatus::Doing)
        {
            return Err(ErrorCode::InvalidParameter);
        }
        tasks.push(task);
        Ok(())
    }

    pub fn set_status(&self, op_id: u64, task_type: TaskType, task_id: u64, status: TaskStatus) -> Result<(), ErrorCode> {
        let mut ops = self.ops.lock();
        let tasks = ops.get_mut(&op_id).ok_or(ErrorCode::InvalidParameter)?;
        let task = tasks
            .iter_mut()
            .find(|t| t.task_type == task_type && t.task_id == task_id)
            .ok_or(ErrorCode::InvalidParameter)?;
        task.status = status;
        Ok(())
    }

    /// A `Doing` task may be externally canceled; long loops check this
    /// periodically and bail with `Failed` if the status has moved off
    /// `Doing` (spec.md §5 "Cancellation & timeouts").
    pub fn request_cancel(&self, op_id: u64, task_type: TaskType, task_id: u64) -> Result<(), ErrorCode> {
        self.set_status(op_id, task_type, task_id, TaskStatus::Canceled)
    }

    pub fn status_of(&self, op_id: u64, task_type: TaskType, task_id: u64) -> Option<TaskStatus> {
        self.ops
            .lock()
            .get(&op_id)?
            .iter()
            .find(|t| t.task_type == task_type && t.task_id == task_id)
            .map(|t| t.status)
    }

    /// `DeleteOPTask`: clears OPs whose every task has reached a terminal
    /// status.
    pub fn delete_completed(&self, op_ids: &[u64]) {
        let mut ops = self.ops.lock();
        for op_id in op_ids {
            if ops.get(op_id).is_some_and(|tasks| tasks.iter().all(|t| t.status.is_terminal())) {
                ops.remove(op_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(op_id: u64, task_type: TaskType, task_id: u64) -> TaskInfo {
        TaskInfo {
            op_id,
            op_type: "test".to_owned(),
            task_type,
            task_id,
            status: TaskStatus::Doing,
        }
    }

    #[test]
    fn rejects_duplicate_doing_task() {
        let tracker = TaskTracker::new();
        tracker.submit(task(1, TaskType::MakeSnapshot, 0)).unwrap();
        assert!(tracker.submit(task(1, TaskType::MakeSnapshot, 0)).is_err());
    }

    #[test]
    fn allows_resubmission_after_terminal_status() {
        let tracker = TaskTracker::new();
        tracker.submit(task(1, TaskType::MakeSnapshot, 0)).unwrap();
        tracker
            .set_status(1, TaskType::MakeSnapshot, 0, TaskStatus::Done)
            .unwrap();
        assert!(tracker.submit(task(1, TaskType::MakeSnapshot, 0)).is_ok());
    }

    #[test]
    fn delete_completed_only_clears_fully_terminal_ops() {
        let tracker = TaskTracker::new();
        tracker.submit(task(1, TaskType::LoadTable, 0)).unwrap();
        tracker.submit(task(1, TaskType::LoadTable, 1)).unwrap();
        tracker.set_status(1, TaskType::LoadTable, 0, TaskStatus::Done).unwrap();
        tracker.delete_completed(&[1]);
        assert!(tracker.status_of(1, TaskType::LoadTable, 0).is_some());
        tracker.set_status(1, TaskType::LoadTable, 1, TaskStatus::Failed).unwrap();
        tracker.delete_completed(&[1]);
        assert!(tracker.status_of(1, TaskType::LoadTable, 0).is_none());
    }
}
