use std::io;

use thiserror::Error;

/// Error decoding a length-prefixed record payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("buffer underrun: wanted {wanted} bytes, had {have}")]
    BufferLength { wanted: usize, have: usize },
    #[error("invalid method tag: {0}")]
    InvalidMethod(u8),
}

/// A checksum mismatch was detected while reading a record.
///
/// Usually wrapped in another error, such as [`Traversal`].
#[derive(Debug, Error)]
#[error("checksum mismatch at offset={offset}: expected={expected:08x} actual={actual:08x}")]
pub struct ChecksumMismatch {
    pub offset: u64,
    pub expected: u32,
    pub actual: u32,
}

/// Error yielded by the binlog's forward-reading iterator.
#[derive(Debug, Error)]
pub enum Traversal {
    #[error("out-of-order record: expected-offset={expected_offset} actual-offset={actual_offset}")]
    OutOfOrder { expected_offset: u64, actual_offset: u64 },
    #[error("failed to decode record at offset={offset}")]
    Decode {
        offset: u64,
        #[source]
        source: DecodeError,
    },
    #[error("checksum mismatch at offset={offset}")]
    Checksum {
        offset: u64,
        #[source]
        source: ChecksumMismatch,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Error returned by [`crate::Binlog::append`].
#[derive(Debug, Error)]
#[error("failed to append record to binlog")]
pub struct Append<T> {
    /// The entry which was passed to `append`, retained so the caller can retry.
    pub entry: T,
    #[source]
    pub source: io::Error,
}
