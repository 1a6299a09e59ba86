use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("malformed MANIFEST line: {0:?}")]
    MalformedLine(String),
    #[error("missing required MANIFEST field: {0}")]
    MissingField(&'static str),
    #[error("invalid integer value for field {field}: {source}")]
    InvalidInt {
        field: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("MANIFEST exists but data file {0:?} is missing")]
    DataFileMissing(std::path::PathBuf),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
