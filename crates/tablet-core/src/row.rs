//! Row format compatibility (spec.md §3 *Row*).
//!
//! A row is an opaque byte buffer; its interpretation is governed by
//! `(schema, format_version, compress_type)`. Format 1 is the only
//! self-describing format this node accepts; any other client-declared
//! version is rejected outright rather than guessed at.

use crate::error::ErrorCode;

pub const SELF_DESCRIBING_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressType {
    None,
    Snappy,
    Zlib,
}

#[derive(Debug, Clone, Copy)]
pub struct RowFormat {
    pub format_version: u32,
    pub compress_type: CompressType,
}

impl RowFormat {
    /// `format_version=1` is the self-describing row format; writes are
    /// rejected when the client's declared version disagrees with what the
    /// table was created with.
    pub fn check_compatible(&self, table_format_version: u32) -> Result<(), ErrorCode> {
        if self.format_version != table_format_version {
            return Err(ErrorCode::PutBadFormat);
        }
        Ok(())
    }

    /// Projection is only defined for the self-describing format with no
    /// compression (spec.md §4.2, §8 *Projection precondition*).
    pub fn supports_projection(&self) -> bool {
        self.format_version == SELF_DESCRIBING_FORMAT_VERSION && self.compress_type == CompressType::None
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    pub format: RowFormat,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_format_version() {
        let fmt = RowFormat {
            format_version: 2,
            compress_type: CompressType::None,
        };
        assert_eq!(fmt.check_compatible(1), Err(ErrorCode::PutBadFormat));
    }

    #[test]
    fn projection_requires_v1_uncompressed() {
        let fmt = RowFormat {
            format_version: 1,
            compress_type: CompressType::Snappy,
        };
        assert!(!fmt.supports_projection());
        let fmt_ok = RowFormat {
            format_version: 1,
            compress_type: CompressType::None,
        };
        assert!(fmt_ok.supports_projection());
    }
}
