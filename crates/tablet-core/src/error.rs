//! The closed error-code set at the RPC boundary (spec.md §7).

use thiserror::Error;

use tablet_table::{MemTableError, SchemaError, TtlTypeMismatch};

/// Stable numeric error codes, matching the names in spec.md §7 one-to-one
/// so handler code can match on `ErrorCode` instead of inventing its own
/// strings at each call site.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    #[error("table does not exist")]
    TableIsNotExist,
    #[error("table already exists")]
    TableAlreadyExists,
    #[error("table is loading")]
    TableIsLoading,
    #[error("table is leader")]
    TableIsLeader,
    #[error("table is follower")]
    TableIsFollower,
    #[error("table status is not normal")]
    TableStatusIsNotNormal,
    #[error("table status is making snapshot")]
    TableStatusIsKMakingSnapshot,
    #[error("table status is not snapshot-paused")]
    TableStatusIsNotKSnapshotPaused,
    #[error("replicator does not exist")]
    ReplicatorIsNotExist,
    #[error("replicator role is not leader")]
    ReplicatorRoleIsNotLeader,
    #[error("replica endpoint already exists")]
    ReplicaEndpointAlreadyExists,
    #[error("failed to add replica endpoint")]
    FailToAddReplicaEndpoint,
    #[error("snapshot does not exist")]
    SnapshotIsNotExist,
    #[error("snapshot is already sending")]
    SnapshotIsSending,
    #[error("index name not found")]
    IdxNameNotFound,
    #[error("ts column name not found")]
    TsNameNotFound,
    #[error("table meta is illegal")]
    TableMetaIsIllegal,
    #[error("invalid dimension parameter")]
    InvalidDimensionParameter,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid concurrency")]
    InvalidConcurrency,
    #[error("st less than et")]
    StLessThanEt,
    #[error("reached the scan max bytes size")]
    ReachTheScanMaxBytesSize,
    #[error("encode error")]
    EncodeError,
    #[error("put failed")]
    PutFailed,
    #[error("put request has a bad format")]
    PutBadFormat,
    #[error("ts must be greater than zero")]
    TsMustBeGreaterThanZero,
    #[error("delete failed")]
    DeleteFailed,
    #[error("write data failed")]
    WriteDataFailed,
    #[error("receive data error")]
    ReceiveDataError,
    #[error("block id mismatch")]
    BlockIdMismatch,
    #[error("cannot find receiver")]
    CannotFindReceiver,
    #[error("file receiver init failed")]
    FileReceiverInitFailed,
    #[error("failed to get db root path")]
    FailToGetDbRootPath,
    #[error("failed to get recycle root path")]
    FailToGetRecycleRootPath,
    #[error("table db path does not exist")]
    TableDbPathIsNotExist,
    #[error("table type mismatch")]
    TableTypeMismatch,
    #[error("add index failed")]
    AddIndexFailed,
    #[error("delete index failed")]
    DeleteIndexFailed,
    #[error("server name not found")]
    ServerNameNotFound,
    #[error("ttl type mismatch")]
    TtlTypeMismatch,
    #[error("ttl is greater than the configured max value")]
    TtlIsGreaterThanConfValue,
    #[error("no follower")]
    NoFollower,
    #[error("node is in follower-cluster mode")]
    IsFollowerCluster,
    #[error("create table failed")]
    CreateTableFailed,
    #[error("procedure already exists")]
    ProcedureAlreadyExists,
    #[error("procedure not found")]
    ProcedureNotFound,
    #[error("sql compile error")]
    SQLCompileError,
    #[error("sql run error")]
    SQLRunError,
    #[error("create procedure failed on tablet")]
    CreateProcedureFailedOnTablet,
}

impl From<SchemaError> for ErrorCode {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::IdxNameNotFound(_) => ErrorCode::IdxNameNotFound,
            SchemaError::TsNameNotFound(_) => ErrorCode::TsNameNotFound,
            SchemaError::TtlTypeMismatch(_) => ErrorCode::TtlTypeMismatch,
            SchemaError::IndexAlreadyExists(_) => ErrorCode::AddIndexFailed,
            SchemaError::PartialTsNameAssignment(_)
            | SchemaError::InvalidTsColumnType(_)
            | SchemaError::ConflictingTsMarkers(_)
            | SchemaError::NonIndexableType(_)
            | SchemaError::TooManyIndexes { .. }
            | SchemaError::TooManyTsColumns => ErrorCode::TableMetaIsIllegal,
        }
    }
}

impl From<TtlTypeMismatch> for ErrorCode {
    fn from(_: TtlTypeMismatch) -> Self {
        ErrorCode::TtlTypeMismatch
    }
}

impl From<MemTableError> for ErrorCode {
    fn from(err: MemTableError) -> Self {
        match err {
            MemTableError::StLessThanEt { .. } => ErrorCode::StLessThanEt,
            MemTableError::InvalidAtLeast { .. } => ErrorCode::InvalidDimensionParameter,
        }
    }
}

/// A handler-level result: either the successful payload or a closed
/// [`ErrorCode`], mirroring the `(code, msg, ...)` RPC contract of spec.md §6.
pub type HandlerResult<T> = Result<T, ErrorCode>;
