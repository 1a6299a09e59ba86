//! Column descriptors (spec.md §3, *Column*).

use crate::ttl::Ttl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
    Timestamp,
    Varchar,
    Date,
}

impl DType {
    /// Whether this type may back a timestamp column (spec.md §4.1 rule 2).
    pub fn can_be_timestamp(self) -> bool {
        matches!(self, DType::Int64 | DType::Timestamp)
    }

    /// Float/double columns cannot be indexed (spec.md §4.1 rule 4).
    pub fn can_be_indexed(self) -> bool {
        !matches!(self, DType::Float | DType::Double)
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub id: u32,
    pub dtype: DType,
    pub not_null: bool,
    /// Zero-based position among this table's timestamp columns, if this
    /// column is one. At most 256 timestamp columns per table.
    pub ts_idx: Option<u32>,
    /// Older `TableMeta` encoding of "this is a timestamp column" that
    /// predates `is_ts_col`/`ts_idx` (spec.md §4.1 rule 3). A column may set
    /// this or `ts_idx`, never both.
    pub legacy_add_ts_idx: bool,
    /// Explicit TTL set directly on this timestamp column. Resolution order
    /// is column_key ttl > this > table ttl (spec.md §4.1, middle tier).
    pub ts_ttl: Option<Ttl>,
}

impl Column {
    pub fn is_ts_column(&self) -> bool {
        self.ts_idx.is_some() || self.legacy_add_ts_idx
    }

    /// Rule 3: the legacy marker and the modern one are mutually exclusive.
    pub fn has_conflicting_ts_markers(&self) -> bool {
        self.legacy_add_ts_idx && self.ts_idx.is_some()
    }
}
