//! Node-wide orchestration (spec.md §4.10, C10): path selection, recycle
//! bin, disk-usage sampling.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::error::ErrorCode;

/// Deterministically assigns a `(tid,pid)` to one of several configured
/// root paths by `hash(tid||pid) mod N` (spec.md §4.10).
pub struct PathSelector {
    db_roots: Vec<PathBuf>,
    recycle_roots: Vec<PathBuf>,
}

impl PathSelector {
    pub fn new(db_roots: Vec<PathBuf>, recycle_roots: Vec<PathBuf>) -> Self {
        Self { db_roots, recycle_roots }
    }

    fn slot(tid: u32, pid: u32, n: usize) -> usize {
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&tid.to_be_bytes());
        bytes.extend_from_slice(&pid.to_be_bytes());
        (blake3::hash(&bytes).as_bytes()[0] as usize
            | (blake3::hash(&bytes).as_bytes()[1] as usize) << 8)
            % n
    }

    pub fn db_root_for(&self, tid: u32, pid: u32) -> Result<&Path, ErrorCode> {
        if self.db_roots.is_empty() {
            return Err(ErrorCode::FailToGetDbRootPath);
        }
        Ok(&self.db_roots[Self::slot(tid, pid, self.db_roots.len())])
    }

    pub fn recycle_root_for(&self, tid: u32, pid: u32) -> Result<&Path, ErrorCode> {
        if self.recycle_roots.is_empty() {
            return Err(ErrorCode::FailToGetRecycleRootPath);
        }
        Ok(&self.recycle_roots[Self::slot(tid, pid, self.recycle_roots.len())])
    }

    pub fn partition_dir(&self, tid: u32, pid: u32) -> Result<PathBuf, ErrorCode> {
        Ok(self.db_root_for(tid, pid)?.join(format!("{tid}_{pid}")))
    }

    pub fn recycle_roots(&self) -> &[PathBuf] {
        &self.recycle_roots
    }
}

/// Moves a dropped partition's directory aside instead of deleting it
/// outright (spec.md §4.10, §8 scenario 6). `now` is injected rather than
/// read from the clock so recovery logic stays deterministic in tests.
pub fn recycle_partition_dir(selector: &PathSelector, tid: u32, pid: u32, now: SystemTime, enabled: bool) -> std::io::Result<Option<PathBuf>> {
    if !enabled {
        return Ok(None);
    }
    let source = match selector.partition_dir(tid, pid) {
        Ok(p) if p.exists() => p,
        _ => return Ok(None),
    };
    let recycle_root = selector
        .recycle_root_for(tid, pid)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    fs::create_dir_all(recycle_root)?;
    let ts = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let dest = recycle_root.join(format!("{tid}_{pid}_{ts}"));
    fs::rename(&source, &dest)?;
    Ok(Some(dest))
}

/// Purges recycled partition directories older than `recycle_ttl`.
pub fn purge_recycle_bin(recycle_root: &Path, now: SystemTime, recycle_ttl: Duration) -> std::io::Result<usize> {
    if !recycle_root.exists() {
        return Ok(0);
    }
    let mut purged = 0;
    for entry in fs::read_dir(recycle_root)? {
        let entry = entry?;
        let Some(ts) = entry
            .file_name()
            .to_str()
            .and_then(|n| n.rsplit('_').next())
            .and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };
        let entry_time = SystemTime::UNIX_EPOCH + Duration::from_secs(ts);
        if now.duration_since(entry_time).unwrap_or_default() >= recycle_ttl {
            fs::remove_dir_all(entry.path())?;
            purged += 1;
        }
    }
    Ok(purged)
}

/// Periodic directory-size walk feeding `DISK_USAGE_BYTES` (spec.md §4.10
/// "Disk-usage sampling").
pub struct DiskUsageSampler {
    last_sample: RwLock<HashMap<(u32, u32), u64>>,
}

impl DiskUsageSampler {
    pub fn new() -> Self {
        Self {
            last_sample: RwLock::new(HashMap::new()),
        }
    }

    pub fn sample(&self, tid: u32, pid: u32, dir: &Path) -> std::io::Result<u64> {
        let size = dir_size(dir)?;
        self.last_sample.write().insert((tid, pid), size);
        crate::metrics::DISK_USAGE_BYTES
            .with_label_values(&[&tid.to_string(), &pid.to_string()])
            .set(size as i64);
        Ok(size)
    }

    pub fn last(&self, tid: u32, pid: u32) -> Option<u64> {
        self.last_sample.read().get(&(tid, pid)).copied()
    }
}

impl Default for DiskUsageSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn dir_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    if !dir.exists() {
        return Ok(0);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// If tcmalloc is present, configure its background release rate
/// (spec.md §4.10 "Memory release"). Most deployments use the system
/// allocator, so this is a no-op unless built with the `tcmalloc` feature.
pub fn configure_memory_release() {
    #[cfg(feature = "tcmalloc")]
    {
        tracing::info!("tcmalloc background release rate left at its default");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_selection_is_deterministic() {
        let selector = PathSelector::new(vec!["/a".into(), "/b".into(), "/c".into()], vec!["/rb".into()]);
        let first = selector.db_root_for(1, 0).unwrap().to_owned();
        let second = selector.db_root_for(1, 0).unwrap().to_owned();
        assert_eq!(first, second);
    }

    #[test]
    fn recycle_and_purge_round_trip() {
        let base = tempfile::tempdir().unwrap();
        let db_root = base.path().join("db");
        let recycle_root = base.path().join("recycle");
        std::fs::create_dir_all(db_root.join("1_0")).unwrap();
        std::fs::write(db_root.join("1_0").join("table_meta.txt"), b"x").unwrap();

        let selector = PathSelector::new(vec![db_root.clone()], vec![recycle_root.clone()]);
        let now = SystemTime::now();
        let dest = recycle_partition_dir(&selector, 1, 0, now, true).unwrap().unwrap();
        assert!(dest.exists());
        assert!(!db_root.join("1_0").exists());

        let purged = purge_recycle_bin(&recycle_root, now + Duration::from_secs(3600), Duration::from_secs(1800)).unwrap();
        assert_eq!(purged, 1);
        assert!(!dest.exists());
    }

    #[test]
    fn disk_usage_sampler_reports_total_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("b"), vec![0u8; 20]).unwrap();
        let sampler = DiskUsageSampler::new();
        let size = sampler.sample(1, 0, dir.path()).unwrap();
        assert_eq!(size, 30);
        assert_eq!(sampler.last(1, 0), Some(30));
    }
}
