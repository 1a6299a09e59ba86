//! Schema/index model and segmented in-memory store for one tablet partition
//! (C1 + C2).

pub mod column;
pub mod error;
pub mod index;
pub mod memtable;
pub mod ttl;

pub use column::{Column, DType};
pub use error::SchemaError;
pub use index::{ColumnKeyDecl, IndexDef, IndexKind, IndexStatus, InnerIndex, TableIndex};
pub use memtable::{BoundType, Dimension, MemTable, MemTableError, ScanParams, TraverseCursor, TsValue};
pub use ttl::{Ttl, TtlKind, TtlTypeMismatch};
