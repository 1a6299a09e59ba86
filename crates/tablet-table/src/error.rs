use thiserror::Error;

use crate::ttl::TtlTypeMismatch;

/// Errors raised while building or mutating the index model (C1).
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("column_key {0:?} must set ts_name on every key or none (partial assignment rejected)")]
    PartialTsNameAssignment(String),
    #[error("timestamp column {0:?} must be a 64-bit integer or timestamp type")]
    InvalidTsColumnType(String),
    #[error("column {0:?} cannot set both legacy add_ts_idx and is_ts_col")]
    ConflictingTsMarkers(String),
    #[error("float/double column {0:?} cannot be indexed")]
    NonIndexableType(String),
    #[error("table already has the maximum of {max} indexes")]
    TooManyIndexes { max: usize },
    #[error("index name {0:?} not found")]
    IdxNameNotFound(String),
    #[error("ts column name {0:?} not found")]
    TsNameNotFound(String),
    #[error("table has more than 256 timestamp columns")]
    TooManyTsColumns,
    #[error("index {0:?} already exists")]
    IndexAlreadyExists(String),
    #[error(transparent)]
    TtlTypeMismatch(#[from] TtlTypeMismatch),
}
