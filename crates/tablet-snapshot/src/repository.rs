use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::warn;
use tablet_commitlog::ReadOutcome;

use crate::{
    compression::{self, SnapshotCompression},
    error::SnapshotError,
    manifest::Manifest,
};

const MANIFEST_FILE: &str = "MANIFEST";

/// Manages the `<tid>_<pid>/snapshot/` directory: MANIFEST plus one or more
/// historical `.sdb` data files (spec.md C4).
pub struct SnapshotRepository {
    root: PathBuf,
}

impl SnapshotRepository {
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn data_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Reads the current MANIFEST, if one has been written yet.
    pub fn latest_manifest(&self) -> Result<Option<Manifest>, SnapshotError> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Manifest::read(&path)?))
    }

    /// Writes a new snapshot data file from `rows` (each the serialized
    /// bytes of one binlog entry, per spec.md's "snapshot data encodes one
    /// binlog entry per record"), then publishes a new MANIFEST pointing at
    /// it.
    ///
    /// The data file name is time-stamped so historical snapshots aren't
    /// clobbered before a caller has had a chance to ship them to a peer.
    pub fn make_snapshot<'a>(
        &self,
        rows: impl Iterator<Item = &'a [u8]>,
        offset: u64,
        term: u64,
        compression: SnapshotCompression,
    ) -> Result<Manifest, SnapshotError> {
        let name = format!("snapshot_{}.sdb", timestamp_suffix());
        let path = self.data_path(&name);
        let file = File::create(&path)?;
        let mut writer = compression::wrap_writer(BufWriter::new(file), compression);

        let mut record_count = 0u64;
        for row in rows {
            tablet_commitlog::write_record(&mut writer, row)?;
            record_count += 1;
        }
        let mut inner = compression::finish_writer(writer)?;
        inner.flush()?;

        let manifest = Manifest {
            name,
            offset,
            term,
            record_count,
        };
        manifest.write_atomic(&self.manifest_path())?;
        Ok(manifest)
    }

    /// Streams the rows of the current snapshot, per spec.md's Recover
    /// contract: "reads MANIFEST and streams the snapshot into an empty
    /// MemTable".
    ///
    /// If MANIFEST exists but the data file is missing, this warns and
    /// returns an empty row set rather than failing outright — the §9 open
    /// question "warn and proceed as if snapshot absent" decision, made
    /// explicit in DESIGN.md.
    pub fn recover_rows(&self, compression: SnapshotCompression) -> Result<(Option<Manifest>, Vec<Vec<u8>>), SnapshotError> {
        let Some(manifest) = self.latest_manifest()? else {
            return Ok((None, Vec::new()));
        };
        let path = self.data_path(&manifest.name);
        if !path.exists() {
            warn!(
                "MANIFEST at {} names missing data file {}; recovering as if no snapshot existed",
                self.manifest_path().display(),
                path.display()
            );
            return Ok((None, Vec::new()));
        }

        let file = File::open(&path)?;
        let mut reader = compression::wrap_reader(BufReader::new(file), compression);
        let mut rows = Vec::with_capacity(manifest.record_count as usize);
        loop {
            match tablet_commitlog::read_record(&mut reader)? {
                ReadOutcome::Payload(payload) => rows.push(payload),
                ReadOutcome::Eof => break,
                ReadOutcome::Partial => break,
                ReadOutcome::Corruption { expected, actual } => {
                    warn!(
                        "bitflip in snapshot data file {}: expected crc={expected:08x} actual={actual:08x}",
                        path.display()
                    );
                    break;
                }
            }
        }
        Ok((Some(manifest), rows))
    }

    /// The set of files a [`crate::SendSnapshot`]-style peer transfer must
    /// ship: `table_meta.txt` (owned by the caller, outside this crate),
    /// the data file, and MANIFEST — spec.md §4.5's three-file transfer.
    pub fn transfer_files(&self, manifest: &Manifest) -> Vec<PathBuf> {
        vec![self.data_path(&manifest.name), self.manifest_path()]
    }
}

fn timestamp_suffix() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}{:09}", now.as_secs(), now.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn make_and_recover_round_trips() {
        let dir = tempdir().unwrap();
        let repo = SnapshotRepository::open(dir.path()).unwrap();
        let rows: Vec<&[u8]> = vec![b"row-a", b"row-b", b"row-c"];
        let manifest = repo
            .make_snapshot(rows.clone().into_iter(), 42, 1, SnapshotCompression::Off)
            .unwrap();
        assert_eq!(manifest.record_count, 3);
        assert_eq!(manifest.offset, 42);

        let (recovered_manifest, recovered_rows) = repo.recover_rows(SnapshotCompression::Off).unwrap();
        assert_eq!(recovered_manifest.unwrap(), manifest);
        assert_eq!(recovered_rows, rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>());
    }

    #[test]
    fn compressed_round_trips() {
        let dir = tempdir().unwrap();
        let repo = SnapshotRepository::open(dir.path()).unwrap();
        let rows: Vec<&[u8]> = vec![b"hello world, compressed"];
        repo.make_snapshot(rows.clone().into_iter(), 1, 1, SnapshotCompression::Zlib)
            .unwrap();
        let (_, recovered) = repo.recover_rows(SnapshotCompression::Zlib).unwrap();
        assert_eq!(recovered, rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>());
    }

    #[test]
    fn missing_data_file_warns_and_returns_empty() {
        let dir = tempdir().unwrap();
        let repo = SnapshotRepository::open(dir.path()).unwrap();
        let manifest = Manifest {
            name: "snapshot_missing.sdb".to_owned(),
            offset: 5,
            term: 1,
            record_count: 1,
        };
        manifest.write_atomic(&repo.manifest_path()).unwrap();

        let (recovered_manifest, rows) = repo.recover_rows(SnapshotCompression::Off).unwrap();
        assert!(recovered_manifest.is_none());
        assert!(rows.is_empty());
    }
}
