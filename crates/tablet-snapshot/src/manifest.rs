//! Text key-value MANIFEST format (spec.md §6): `name`, `offset`, `term`,
//! `count`. Mirrors the teacher's preference for a human-readable, greppable
//! control file over a binary one for anything an operator might need to
//! inspect by hand.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::ManifestError;

/// Point-in-time snapshot descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// File name (under the snapshot directory) of the data file this
    /// manifest describes.
    pub name: String,
    /// Highest binlog offset reflected in the snapshot.
    pub offset: u64,
    /// Leader term at the time the snapshot was taken.
    pub term: u64,
    /// Number of records written to the data file.
    pub record_count: u64,
}

impl Manifest {
    pub fn encode(&self) -> String {
        format!(
            "name={}\noffset={}\nterm={}\ncount={}\n",
            self.name, self.offset, self.term, self.record_count
        )
    }

    pub fn decode(text: &str) -> Result<Self, ManifestError> {
        let mut name = None;
        let mut offset = None;
        let mut term = None;
        let mut count = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| ManifestError::MalformedLine(line.to_owned()))?;
            match key {
                "name" => name = Some(value.to_owned()),
                "offset" => offset = Some(parse_u64("offset", value)?),
                "term" => term = Some(parse_u64("term", value)?),
                "count" => count = Some(parse_u64("count", value)?),
                _ => continue,
            }
        }

        Ok(Self {
            name: name.ok_or(ManifestError::MissingField("name"))?,
            offset: offset.ok_or(ManifestError::MissingField("offset"))?,
            term: term.ok_or(ManifestError::MissingField("term"))?,
            record_count: count.ok_or(ManifestError::MissingField("count"))?,
        })
    }

    /// Reads MANIFEST from `path`.
    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path)?;
        Self::decode(&text)
    }

    /// Writes MANIFEST to `path`, replacing any existing file via a
    /// write-then-rename so a reader never observes a partially written one.
    pub fn write_atomic(&self, path: &Path) -> Result<(), ManifestError> {
        let tmp: PathBuf = path.with_extension("tmp");
        fs::write(&tmp, self.encode())?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ManifestError> {
    value.parse().map_err(|source| ManifestError::InvalidInt { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let m = Manifest {
            name: "snapshot_20260727T120000.sdb".to_owned(),
            offset: 105,
            term: 3,
            record_count: 9001,
        };
        let decoded = Manifest::decode(&m.encode()).unwrap();
        assert_eq!(m, decoded);
    }

    #[test]
    fn rejects_missing_field() {
        let text = "name=foo.sdb\noffset=1\nterm=1\n";
        assert!(Manifest::decode(text).is_err());
    }
}
