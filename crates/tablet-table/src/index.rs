//! Index model (spec.md §4.1, C1): parses column-key declarations into a
//! runtime [`TableIndex`], grouping logical indexes that share a key-column
//! set into one physical [`InnerIndex`].

use std::collections::BTreeMap;

use crate::{
    column::{Column, DType},
    error::SchemaError,
    ttl::Ttl,
};

pub const MAX_INDEXES: usize = 200;
pub const MAX_TS_COLUMNS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Ready,
    Waiting,
    Deleting,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    TimeSeries,
    PrimaryKey,
    AutoGen,
    Unique,
}

/// One logical index: a named view over an [`InnerIndex`]'s physical
/// storage, bound to a single `ts_column` when the table has more than one.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub id: u32,
    pub status: IndexStatus,
    pub kind: IndexKind,
    pub key_columns: Vec<String>,
    pub ts_column: Option<String>,
    pub ttl: Ttl,
    pub inner_pos: u32,
}

/// The physical grouping of one or more [`IndexDef`]s that share an
/// identical *set* of key column names (spec.md §4.1 rule 7). They share one
/// segmented store in [`crate::memtable::MemTable`]; each index keeps its
/// own `ts_idx` view and its own TTL.
#[derive(Debug, Clone)]
pub struct InnerIndex {
    pub pos: u32,
    pub key_columns: Vec<String>,
    /// Indexes (by id) sharing this inner position, each contributing one
    /// `ts_idx` view.
    pub member_index_ids: Vec<u32>,
}

/// Canonical grouping key for a key-column set: sorted, `|`-joined names.
pub fn grouping_key(key_columns: &[String]) -> String {
    let mut sorted: Vec<&str> = key_columns.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join("|")
}

/// The full, validated index set for one table (spec.md §4.1).
#[derive(Debug, Clone, Default)]
pub struct TableIndex {
    pub indexes: Vec<IndexDef>,
    pub inner_indexes: Vec<InnerIndex>,
}

impl TableIndex {
    /// Builds a [`TableIndex`] from column-key declarations.
    ///
    /// `column_keys` is `(key_columns, ts_names, ttl)` per declaration; each
    /// `ts_names` entry yields one [`IndexDef`] sharing `(key_columns,
    /// inner_pos)` with its siblings (rule 6). If `column_keys` is empty, a
    /// default index `idx0` is created inheriting `table_ttl` and treated as
    /// the primary key index (spec.md §4.1, final paragraph).
    pub fn build(
        columns: &[Column],
        column_keys: &[ColumnKeyDecl],
        table_ttl: Ttl,
    ) -> Result<Self, SchemaError> {
        validate_ts_columns(columns)?;

        if column_keys.is_empty() {
            let idx = IndexDef {
                name: "idx0".to_owned(),
                id: 0,
                status: IndexStatus::Ready,
                kind: IndexKind::PrimaryKey,
                key_columns: vec![],
                ts_column: None,
                ttl: table_ttl,
                inner_pos: 0,
            };
            return Ok(Self {
                inner_indexes: vec![InnerIndex {
                    pos: 0,
                    key_columns: vec![],
                    member_index_ids: vec![0],
                }],
                indexes: vec![idx],
            });
        }

        for key in column_keys {
            if !key.ts_names.is_empty() {
                for name in &key.ts_names {
                    let col = columns
                        .iter()
                        .find(|c| &c.name == name)
                        .ok_or_else(|| SchemaError::TsNameNotFound(name.clone()))?;
                    if !col.dtype.can_be_timestamp() {
                        return Err(SchemaError::InvalidTsColumnType(name.clone()));
                    }
                }
            }
            for name in &key.key_columns {
                let col = columns
                    .iter()
                    .find(|c| &c.name == name)
                    .ok_or_else(|| SchemaError::IdxNameNotFound(name.clone()))?;
                if !col.dtype.can_be_indexed() {
                    return Err(SchemaError::NonIndexableType(name.clone()));
                }
            }
        }

        // Rule 1: partial ts_name assignment (some column_keys set it, some
        // don't) is rejected.
        let any_set = column_keys.iter().any(|k| !k.ts_names.is_empty());
        let all_set = column_keys.iter().all(|k| !k.ts_names.is_empty());
        if any_set && !all_set {
            let offender = column_keys.iter().find(|k| k.ts_names.is_empty()).unwrap();
            return Err(SchemaError::PartialTsNameAssignment(offender.key_columns.join(",")));
        }

        let mut indexes = Vec::new();
        let mut inner_by_group: BTreeMap<String, u32> = BTreeMap::new();
        let mut inner_indexes: Vec<InnerIndex> = Vec::new();
        let mut next_id = 0u32;

        for key in column_keys {
            let group_key = grouping_key(&key.key_columns);
            let inner_pos = *inner_by_group.entry(group_key.clone()).or_insert_with(|| {
                let pos = inner_indexes.len() as u32;
                inner_indexes.push(InnerIndex {
                    pos,
                    key_columns: key.key_columns.clone(),
                    member_index_ids: vec![],
                });
                pos
            });

            let ts_names = if key.ts_names.is_empty() {
                vec![None]
            } else {
                key.ts_names.iter().cloned().map(Some).collect()
            };

            for ts_name in ts_names {
                if indexes.len() >= MAX_INDEXES {
                    return Err(SchemaError::TooManyIndexes { max: MAX_INDEXES });
                }
                let ts_col_ttl = ts_name.as_ref().and_then(|n| columns.iter().find(|c| &c.name == n)).and_then(|c| c.ts_ttl);
                let ttl = key.ttl.or(ts_col_ttl).unwrap_or(table_ttl);
                let id = next_id;
                next_id += 1;
                inner_indexes[inner_pos as usize].member_index_ids.push(id);
                indexes.push(IndexDef {
                    name: key.name.clone(),
                    id,
                    status: IndexStatus::Ready,
                    kind: key.kind,
                    key_columns: key.key_columns.clone(),
                    ts_column: ts_name,
                    ttl,
                    inner_pos,
                });
            }
        }

        if indexes.len() >= MAX_INDEXES {
            return Err(SchemaError::TooManyIndexes { max: MAX_INDEXES });
        }

        Ok(Self { indexes, inner_indexes })
    }

    pub fn find_by_name(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn inner_index(&self, pos: u32) -> Option<&InnerIndex> {
        self.inner_indexes.iter().find(|i| i.pos == pos)
    }

    /// AddIndex (spec.md §1(e), C8): appends one new logical index, `Waiting`
    /// until its data is populated. Shares an existing inner index if one
    /// already covers the same key-column set; otherwise `alloc_inner_pos`
    /// is called once to obtain a fresh position — callers pass
    /// `MemTable::add_inner_index` so the schema's `inner_pos` numbering
    /// never drifts from the MemTable's actual group vector.
    pub fn with_index_added(
        &self,
        columns: &[Column],
        decl: &ColumnKeyDecl,
        table_ttl: Ttl,
        alloc_inner_pos: impl FnOnce() -> u32,
    ) -> Result<Self, SchemaError> {
        if self.find_by_name(&decl.name).is_some() {
            return Err(SchemaError::IndexAlreadyExists(decl.name.clone()));
        }
        if self.indexes.len() >= MAX_INDEXES {
            return Err(SchemaError::TooManyIndexes { max: MAX_INDEXES });
        }
        for name in &decl.key_columns {
            let col = columns
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| SchemaError::IdxNameNotFound(name.clone()))?;
            if !col.dtype.can_be_indexed() {
                return Err(SchemaError::NonIndexableType(name.clone()));
            }
        }
        if let Some(ts_name) = decl.ts_names.first() {
            let col = columns
                .iter()
                .find(|c| &c.name == ts_name)
                .ok_or_else(|| SchemaError::TsNameNotFound(ts_name.clone()))?;
            if !col.dtype.can_be_timestamp() {
                return Err(SchemaError::InvalidTsColumnType(ts_name.clone()));
            }
        }

        let mut indexes = self.indexes.clone();
        let mut inner_indexes = self.inner_indexes.clone();
        let group_key = grouping_key(&decl.key_columns);
        let inner_pos = match inner_indexes.iter().find(|i| grouping_key(&i.key_columns) == group_key) {
            Some(existing) => existing.pos,
            None => {
                let pos = alloc_inner_pos();
                inner_indexes.push(InnerIndex {
                    pos,
                    key_columns: decl.key_columns.clone(),
                    member_index_ids: vec![],
                });
                pos
            }
        };

        let ts_col_ttl = decl.ts_names.first().and_then(|n| columns.iter().find(|c| &c.name == n)).and_then(|c| c.ts_ttl);
        let ttl = decl.ttl.or(ts_col_ttl).unwrap_or(table_ttl);
        let id = indexes.iter().map(|i| i.id).max().map(|m| m + 1).unwrap_or(0);
        inner_indexes
            .iter_mut()
            .find(|i| i.pos == inner_pos)
            .expect("inner_pos was just looked up or inserted above")
            .member_index_ids
            .push(id);
        indexes.push(IndexDef {
            name: decl.name.clone(),
            id,
            status: IndexStatus::Waiting,
            kind: decl.kind,
            key_columns: decl.key_columns.clone(),
            ts_column: decl.ts_names.first().cloned(),
            ttl,
            inner_pos,
        });
        Ok(Self { indexes, inner_indexes })
    }

    /// Moves every `IndexDef` named `name` to `status`; used to drive
    /// `Waiting -> Ready` once DumpIndexData/LoadIndexData populate a new
    /// index, and `Ready -> Deleting -> Deleted` for DeleteIndex.
    pub fn with_index_status(&self, name: &str, status: IndexStatus) -> Option<Self> {
        if !self.indexes.iter().any(|i| i.name == name) {
            return None;
        }
        let mut indexes = self.indexes.clone();
        for idx in indexes.iter_mut().filter(|i| i.name == name) {
            idx.status = status;
        }
        Some(Self {
            indexes,
            inner_indexes: self.inner_indexes.clone(),
        })
    }

    /// Drops every `IndexDef` named `name` once DeleteIndex has finished
    /// extracting its data (`status == Deleted`). The inner index itself is
    /// kept — other logical indexes, or a future AddIndex, may still share
    /// it — only the removed index's membership is pruned from it.
    pub fn without_index(&self, name: &str) -> Self {
        let removed_ids: Vec<u32> = self.indexes.iter().filter(|i| i.name == name).map(|i| i.id).collect();
        let indexes = self.indexes.iter().filter(|i| i.name != name).cloned().collect();
        let inner_indexes = self
            .inner_indexes
            .iter()
            .map(|inner| InnerIndex {
                pos: inner.pos,
                key_columns: inner.key_columns.clone(),
                member_index_ids: inner.member_index_ids.iter().copied().filter(|id| !removed_ids.contains(id)).collect(),
            })
            .collect();
        Self { indexes, inner_indexes }
    }
}

/// One `column_key` declaration as it arrives from `TableMeta`, before
/// indexes are materialized.
#[derive(Debug, Clone)]
pub struct ColumnKeyDecl {
    pub name: String,
    pub kind: IndexKind,
    pub key_columns: Vec<String>,
    pub ts_names: Vec<String>,
    /// Explicit TTL override; resolution order is column_key > ts-column >
    /// table (spec.md §4.1).
    pub ttl: Option<Ttl>,
}

fn validate_ts_columns(columns: &[Column]) -> Result<(), SchemaError> {
    let ts_count = columns.iter().filter(|c| c.is_ts_column()).count();
    if ts_count > MAX_TS_COLUMNS {
        return Err(SchemaError::TooManyTsColumns);
    }
    for col in columns {
        if col.has_conflicting_ts_markers() {
            return Err(SchemaError::ConflictingTsMarkers(col.name.clone()));
        }
        if col.is_ts_column() && !col.dtype.can_be_timestamp() {
            return Err(SchemaError::InvalidTsColumnType(col.name.clone()));
        }
    }
    Ok(())
}
