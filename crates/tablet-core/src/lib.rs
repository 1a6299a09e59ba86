//! Per-node tablet orchestration: replication, partition lifecycle, request
//! handlers, task tracking, and catalog refresh (spec.md §§4.5-4.10).

pub mod catalog;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestration;
pub mod partition;
pub mod registry;
pub mod replicator;
pub mod row;
pub mod slow;
pub mod task;
pub mod transfer;

pub use catalog::{CatalogRefresher, CatalogSnapshot, CatalogSource, CompiledProcedure, ProcedureInfo};
pub use config::Config;
pub use error::{ErrorCode, HandlerResult};
pub use orchestration::{DiskUsageSampler, PathSelector};
pub use partition::handlers::{
    apply_replicated_entry, change_role, count, delete, get, put, scan, traverse, GetRequest, Partition,
    PartitionThresholds, PutRequest, ScanRequest,
};
pub use partition::index_ops::{add_index, delete_index};
pub use partition::lifecycle::{PartitionState, PartitionStateMachine};
pub use partition::recovery::recover;
pub use partition::snapshot::make_snapshot;
pub use registry::PartitionRegistry;
pub use replicator::{AddReplicaPolicy, Replicator, Role};
pub use row::{CompressType, Row, RowFormat};
pub use slow::{SlowGuard, SlowOp};
pub use task::{TaskInfo, TaskStatus, TaskTracker, TaskType};
pub use transfer::{send_file, FileReceiver, FileReceiverTable};
