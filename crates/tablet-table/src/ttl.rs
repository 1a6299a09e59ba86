//! TTL semantics (spec.md §3, *TTL*): a pure function of `(abs_ms,
//! lat_count, kind)` plus the candidate row's `(ts, rank)`.

/// Which components of a [`Ttl`] are active and how they combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlKind {
    Absolute,
    Latest,
    AbsAndLat,
    AbsOrLat,
}

/// `(abs_ms, lat_count, kind)`. `kind` is immutable once a [`Ttl`] is
/// attached to an index; `abs_ms`/`lat_count` may be updated in place
/// (spec.md: "updating TTL is atomic; type is immutable").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttl {
    pub abs_ms: i64,
    pub lat_count: u64,
    pub kind: TtlKind,
}

impl Ttl {
    pub fn none() -> Self {
        Self {
            abs_ms: 0,
            lat_count: 0,
            kind: TtlKind::Absolute,
        }
    }

    /// Whether this TTL has any component that could ever evict a row; a
    /// fully-zeroed TTL never needs GC.
    pub fn needs_gc(&self) -> bool {
        match self.kind {
            TtlKind::Absolute => self.abs_ms > 0,
            TtlKind::Latest => self.lat_count > 0,
            TtlKind::AbsAndLat | TtlKind::AbsOrLat => self.abs_ms > 0 || self.lat_count > 0,
        }
    }

    fn absolute_expired(&self, ts: i64) -> bool {
        self.abs_ms > 0 && ts <= self.abs_ms
    }

    fn latest_expired(&self, rank: u64) -> bool {
        self.lat_count > 0 && rank > self.lat_count
    }

    /// Whether the row at `ts` with 1-based recency `rank` (1 = newest) is
    /// expired, per the truth table in spec.md §3.
    pub fn is_expired(&self, ts: i64, rank: u64) -> bool {
        match self.kind {
            TtlKind::Absolute => self.absolute_expired(ts),
            TtlKind::Latest => self.latest_expired(rank),
            TtlKind::AbsAndLat => self.absolute_expired(ts) && self.latest_expired(rank),
            TtlKind::AbsOrLat => self.absolute_expired(ts) || self.latest_expired(rank),
        }
    }

    /// Updates the mutable components of the TTL, rejecting a change of
    /// `kind` (spec.md §3 invariant / `TtlTypeMismatch` in §7).
    pub fn update(&mut self, abs_ms: i64, lat_count: u64, kind: TtlKind) -> Result<(), TtlTypeMismatch> {
        if kind != self.kind {
            return Err(TtlTypeMismatch {
                current: self.kind,
                requested: kind,
            });
        }
        self.abs_ms = abs_ms;
        self.lat_count = lat_count;
        Ok(())
    }

    /// The `et` bound a scan should actually use, per spec.md §4.2: "for
    /// Absolute/AbsOrLat, `et` is promoted to `max(et, expire_time)`".
    pub fn promote_et(&self, et: i64) -> i64 {
        match self.kind {
            TtlKind::Absolute | TtlKind::AbsOrLat if self.abs_ms > 0 => et.max(self.abs_ms),
            _ => et,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot change TTL kind from {current:?} to {requested:?}")]
pub struct TtlTypeMismatch {
    pub current: TtlKind,
    pub requested: TtlKind,
}
