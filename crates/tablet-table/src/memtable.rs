//! In-memory segmented store for one tablet partition (spec.md §4.2, C2).
//!
//! One [`MemTable`] holds one [`IndexGroupStore`] per inner index. Each
//! group shards primary keys across `seg_cnt` segments by a fast hash of the
//! key bytes; within a segment, a lock-free [`crossbeam_skiplist::SkipMap`]
//! maps `pk -> per-pk chain`, and the chain itself is protected by a striped
//! [`parking_lot::RwLock`]. A chain is append-on-write: `(ts_idx, ts)` maps
//! to a *list* of values in put order, not a single overwritten slot, since
//! two `Put`s at the same `(pk, ts_idx, ts)` must both survive until a reader
//! asks to coalesce them (`remove_duplicated_record`).

use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;

use crate::ttl::Ttl;

pub const DEFAULT_SEG_CNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundType {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, thiserror::Error)]
pub enum MemTableError {
    #[error("st ({st}) must not be less than et ({et}) when st is set")]
    StLessThanEt { st: i64, et: i64 },
    #[error("atleast ({atleast}) must not exceed a nonzero limit ({limit})")]
    InvalidAtLeast { atleast: u32, limit: u32 },
}

/// One dimension of a multi-index put: which inner index and the key bytes
/// for it.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub inner_pos: u32,
    pub key: Vec<u8>,
}

/// One ts-column value to attach under a given `ts_idx`.
#[derive(Debug, Clone, Copy)]
pub struct TsValue {
    pub ts_idx: u32,
    pub ts: i64,
}

#[derive(Debug, Clone)]
pub struct ScanParams {
    pub ts_idx: u32,
    pub st: i64,
    pub st_type: BoundType,
    pub et: i64,
    pub et_type: BoundType,
    /// 0 means unbounded.
    pub limit: u32,
    pub atleast: u32,
    pub remove_duplicated_record: bool,
}

impl ScanParams {
    pub fn validate(&self) -> Result<(), MemTableError> {
        if self.st > 0 && self.st < self.et {
            return Err(MemTableError::StLessThanEt { st: self.st, et: self.et });
        }
        if self.limit > 0 && self.atleast > self.limit {
            return Err(MemTableError::InvalidAtLeast {
                atleast: self.atleast,
                limit: self.limit,
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct PkChain {
    /// Ascending by `(ts_idx, ts)`; a given `ts_idx`'s entries form a
    /// contiguous run since `ts_idx` sorts first. Each bucket holds every
    /// value ever `Put` at that exact `(ts_idx, ts)`, oldest first.
    rows: RwLock<BTreeMap<(u32, i64), Vec<Vec<u8>>>>,
}

struct Segment {
    pk_index: SkipMap<Vec<u8>, Arc<PkChain>>,
}

impl Segment {
    fn new() -> Self {
        Self {
            pk_index: SkipMap::new(),
        }
    }

    fn chain_for(&self, pk: &[u8]) -> Arc<PkChain> {
        if let Some(entry) = self.pk_index.get(pk) {
            return entry.value().clone();
        }
        let entry = self.pk_index.get_or_insert(pk.to_vec(), Arc::new(PkChain::default()));
        entry.value().clone()
    }

    fn get_chain(&self, pk: &[u8]) -> Option<Arc<PkChain>> {
        self.pk_index.get(pk).map(|e| e.value().clone())
    }
}

/// One inner index's physical storage: `seg_cnt` segments of pk-sharded
/// per-pk chains.
struct IndexGroupStore {
    segments: Vec<Segment>,
}

impl IndexGroupStore {
    fn new(seg_cnt: usize) -> Self {
        Self {
            segments: (0..seg_cnt).map(|_| Segment::new()).collect(),
        }
    }

    fn segment_for(&self, pk: &[u8]) -> &Segment {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        pk.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.segments.len();
        &self.segments[idx]
    }
}

/// The in-memory store for one tablet partition, one [`IndexGroupStore`] per
/// inner index position.
pub struct MemTable {
    seg_cnt: usize,
    groups: RwLock<Vec<IndexGroupStore>>,
}

impl MemTable {
    pub fn new(inner_index_count: u32, seg_cnt: usize) -> Self {
        Self {
            seg_cnt,
            groups: RwLock::new((0..inner_index_count).map(|_| IndexGroupStore::new(seg_cnt)).collect()),
        }
    }

    /// Registers storage for a newly added inner index (spec.md C8
    /// `AddIndex`).
    pub fn add_inner_index(&self) -> u32 {
        let mut groups = self.groups.write();
        groups.push(IndexGroupStore::new(self.seg_cnt));
        (groups.len() - 1) as u32
    }

    fn with_group<R>(&self, inner_pos: u32, f: impl FnOnce(&IndexGroupStore) -> R) -> Option<R> {
        let groups = self.groups.read();
        groups.get(inner_pos as usize).map(f)
    }

    /// Writes `value` under every listed dimension, attaching every
    /// `ts_values` entry to each — spec.md §4.2 Put contracts combined:
    /// single-index, multi-dimension, and multi-ts-column puts all reduce to
    /// "for each dimension, for each ts_value, upsert".
    pub fn put(&self, dimensions: &[Dimension], ts_values: &[TsValue], value: &[u8]) {
        for dim in dimensions {
            self.with_group(dim.inner_pos, |group| {
                let chain = group.segment_for(&dim.key).chain_for(&dim.key);
                let mut rows = chain.rows.write();
                for tsv in ts_values {
                    rows.entry((tsv.ts_idx, tsv.ts)).or_default().push(value.to_vec());
                }
            });
        }
    }

    /// Removes every value stored at `(pk, ts_idx, ts)`, including any
    /// duplicate-timestamp entries accumulated by repeated `Put`s. A
    /// `Delete` binlog entry carries no value; callers apply it by simply
    /// not re-inserting, or by calling [`Self::delete_ts`] for an explicit
    /// point tombstone.
    pub fn delete_ts(&self, inner_pos: u32, pk: &[u8], ts_idx: u32, ts: i64) -> bool {
        self.with_group(inner_pos, |group| {
            let Some(chain) = group.segment_for(pk).get_chain(pk) else {
                return false;
            };
            chain.rows.write().remove(&(ts_idx, ts)).is_some()
        })
        .unwrap_or(false)
    }

    /// Point lookup honoring `params.st`/`params.st_type` as an exact-ish
    /// bound; returns the newest row satisfying the full range, if any.
    pub fn get(
        &self,
        inner_pos: u32,
        pk: &[u8],
        ttl: &Ttl,
        params: &ScanParams,
    ) -> Result<Option<(i64, Vec<u8>)>, MemTableError> {
        Ok(self.scan(inner_pos, pk, ttl, params)?.into_iter().next())
    }

    /// Range scan over one pk's `ts_idx` view, newest first, honoring TTL
    /// expiration, `st`/`et` bounds, `limit`/`atleast`, and de-duplication
    /// (spec.md §4.2 Get/Scan contracts).
    pub fn scan(
        &self,
        inner_pos: u32,
        pk: &[u8],
        ttl: &Ttl,
        params: &ScanParams,
    ) -> Result<Vec<(i64, Vec<u8>)>, MemTableError> {
        params.validate()?;
        let (et, et_type) = promote_et(ttl, params.et, params.et_type);

        let Some(chain) = self.with_group(inner_pos, |group| group.segment_for(pk).get_chain(pk)).flatten() else {
            return Ok(vec![]);
        };
        let rows = chain.rows.read();

        let mut live = Vec::new();
        let mut expired = Vec::new();
        let mut rank = 0u64;
        'outer: for ((idx, ts), values) in rows
            .range((params.ts_idx, i64::MIN)..=(params.ts_idx, i64::MAX))
            .rev()
        {
            debug_assert_eq!(*idx, params.ts_idx);
            if !matches_bound(*ts, params.st, params.st_type, BoundSide::Upper) {
                continue;
            }
            if !matches_bound(*ts, et, et_type, BoundSide::Lower) {
                break;
            }
            // Within one (ts_idx, ts) bucket, duplicate puts are newest-last;
            // walk them newest-first so rank still reflects recency.
            for (seq, value) in values.iter().rev().enumerate() {
                if params.remove_duplicated_record && seq > 0 {
                    continue;
                }
                rank += 1;
                if ttl.is_expired(*ts, rank) {
                    expired.push((*ts, value.clone()));
                } else {
                    live.push((*ts, value.clone()));
                }
                let have = live.len();
                let limit_reached = params.limit > 0 && have as u32 >= params.limit;
                let atleast_satisfied = have as u32 + expired.len() as u32 >= params.atleast;
                if limit_reached && atleast_satisfied {
                    break 'outer;
                }
            }
        }

        let mut out = live;
        if (out.len() as u32) < params.atleast {
            let need = params.atleast as usize - out.len();
            out.extend(expired.into_iter().take(need));
        }
        if params.limit > 0 {
            out.truncate(params.limit as usize);
        }
        Ok(out)
    }

    /// Counts entries for `pk` under `ts_idx`, optionally filtering expired
    /// ones (spec.md §4.2 Count).
    pub fn count(&self, inner_pos: u32, pk: &[u8], ts_idx: u32, ttl: &Ttl, filter_expired: bool) -> u64 {
        let Some(chain) = self.with_group(inner_pos, |group| group.segment_for(pk).get_chain(pk)).flatten() else {
            return 0;
        };
        let rows = chain.rows.read();
        let range = rows.range((ts_idx, i64::MIN)..=(ts_idx, i64::MAX));
        if !filter_expired {
            return range.map(|(_, values)| values.len() as u64).sum();
        }
        let mut rank = 0u64;
        let mut live = 0u64;
        for ((_, ts), values) in range.rev() {
            for _ in values.iter().rev() {
                rank += 1;
                if !ttl.is_expired(*ts, rank) {
                    live += 1;
                }
            }
        }
        live
    }

    /// Evicts all `(pk, entry)` pairs under `ts_idx` for which
    /// `ttl.is_expired` holds. Returns the number of evicted entries.
    pub fn gc(&self, inner_pos: u32, ts_idx: u32, ttl: &Ttl) -> u64 {
        if !ttl.needs_gc() {
            return 0;
        }
        let mut evicted = 0u64;
        self.with_group(inner_pos, |group| {
            for segment in &group.segments {
                for entry in segment.pk_index.iter() {
                    let chain = entry.value();
                    let mut rows = chain.rows.write();
                    let keys: Vec<(u32, i64)> = rows
                        .range((ts_idx, i64::MIN)..=(ts_idx, i64::MAX))
                        .map(|(k, _)| *k)
                        .collect();
                    let mut rank = 0u64;
                    for key in keys.into_iter().rev() {
                        let remove_entirely = {
                            let values = rows.get_mut(&key).expect("key just collected from this map");
                            let mut keep = Vec::with_capacity(values.len());
                            for value in values.drain(..).rev() {
                                rank += 1;
                                if ttl.is_expired(key.1, rank) {
                                    evicted += 1;
                                } else {
                                    keep.push(value);
                                }
                            }
                            keep.reverse();
                            let now_empty = keep.is_empty();
                            *values = keep;
                            now_empty
                        };
                        if remove_entirely {
                            rows.remove(&key);
                        }
                    }
                }
            }
        });
        evicted
    }

    /// Resumable cursor for [`Self::traverse`].
    pub fn traverse(
        &self,
        inner_pos: u32,
        ts_idx: u32,
        cursor: TraverseCursor,
        max_cnt: u32,
    ) -> (Vec<(Vec<u8>, i64, Vec<u8>)>, TraverseCursor, bool) {
        let mut out = Vec::new();
        let groups = self.groups.read();
        let Some(group) = groups.get(inner_pos as usize) else {
            return (out, cursor, true);
        };

        let mut shard = cursor.shard as usize;
        let mut skip_pk = cursor.pk.clone();
        let mut skip_ts = cursor.ts;
        let mut skip_seq = cursor.seq;

        while shard < group.segments.len() {
            let segment = &group.segments[shard];
            for entry in segment.pk_index.iter() {
                let pk = entry.key();
                if let Some(resume_pk) = &skip_pk {
                    if pk < resume_pk {
                        continue;
                    }
                }
                let resuming_this_pk = skip_pk.as_deref() == Some(pk.as_slice());
                let chain = entry.value();
                let rows = chain.rows.read();
                for ((idx, ts), values) in rows.range((ts_idx, i64::MIN)..=(ts_idx, i64::MAX)).rev() {
                    debug_assert_eq!(*idx, ts_idx);
                    let start = if resuming_this_pk {
                        match skip_ts {
                            Some(resume_ts) if *ts > resume_ts => continue,
                            Some(resume_ts) if *ts == resume_ts => skip_seq as usize,
                            _ => 0,
                        }
                    } else {
                        0
                    };
                    for (seq, value) in values.iter().rev().enumerate().skip(start) {
                        out.push((pk.clone(), *ts, value.clone()));
                        if out.len() as u32 >= max_cnt {
                            return (
                                out,
                                TraverseCursor {
                                    shard: shard as u32,
                                    pk: Some(pk.clone()),
                                    ts: Some(*ts),
                                    seq: seq as u32 + 1,
                                },
                                false,
                            );
                        }
                    }
                }
                skip_pk = None;
                skip_ts = None;
                skip_seq = 0;
            }
            shard += 1;
        }
        (out, TraverseCursor::default(), true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TraverseCursor {
    pub shard: u32,
    pub pk: Option<Vec<u8>>,
    pub ts: Option<i64>,
    /// How many duplicate-timestamp entries at `(pk, ts)`, counted
    /// newest-first, were already emitted before this cursor was returned.
    pub seq: u32,
}

#[derive(Debug, Clone, Copy)]
enum BoundSide {
    Upper,
    Lower,
}

fn matches_bound(ts: i64, bound: i64, bound_type: BoundType, side: BoundSide) -> bool {
    if matches!(side, BoundSide::Upper) && bound == 0 {
        // spec.md: "Emptiness of st means from newest" — no upper restriction.
        return true;
    }
    match bound_type {
        BoundType::Eq => ts == bound,
        BoundType::Lt => ts < bound,
        BoundType::Le => ts <= bound,
        BoundType::Gt => ts > bound,
        BoundType::Ge => ts >= bound,
    }
}

/// Applies the et-promotion and Gt->Ge demotion rules of spec.md §4.2.
fn promote_et(ttl: &Ttl, et: i64, et_type: BoundType) -> (i64, BoundType) {
    let promoted = ttl.promote_et(et);
    if promoted != et && et_type == BoundType::Gt {
        (promoted, BoundType::Ge)
    } else {
        (promoted, et_type)
    }
}
