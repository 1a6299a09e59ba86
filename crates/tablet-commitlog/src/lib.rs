//! Segmented, CRC-framed append-only binlog for a tablet partition (C3).
//!
//! Records are framed as `CRC32(payload) || varint len || payload`, grouped
//! into rolling segment files named `%08u.log`. Readers can tail the open
//! segment: [`commitlog::ReadStatus::WaitRecord`] signals "nothing new yet,
//! retry after the sync window" rather than treating the writer racing ahead
//! as an error.

mod commitlog;
mod entry;
pub mod error;
mod segment;
mod varint;

pub use commitlog::{Binlog, BinlogReader, Options, ReadStatus};
pub use entry::{Dimension, LogEntry, Method, TsDimension};
pub use segment::{parse_segment_file_name, read_record, segment_file_name, write_record, ReadOutcome};
