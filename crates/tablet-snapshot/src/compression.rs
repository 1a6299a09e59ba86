//! Snapshot and file-transfer compression, per spec.md §6
//! (`snapshot_compression`, `file_compression`).

use std::io::{self, Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression as ZlibLevel};

/// Compression used for the on-disk snapshot data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotCompression {
    #[default]
    Off,
    Zlib,
    Snappy,
}

/// Compression used when streaming a snapshot or binlog segment to a peer
/// during [`crate::SendSnapshot`]-style transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileCompression {
    #[default]
    Off,
    Zlib,
    Lz4,
}

/// Wraps `w` so that writes are compressed per `compression`. The returned
/// writer must be finished via [`finish_writer`] to flush any trailing
/// compressor state.
pub enum SnapshotWriter<W: Write> {
    Off(W),
    Zlib(ZlibEncoder<W>),
    Snappy(snap::write::FrameEncoder<W>),
}

pub fn wrap_writer<W: Write>(w: W, compression: SnapshotCompression) -> SnapshotWriter<W> {
    match compression {
        SnapshotCompression::Off => SnapshotWriter::Off(w),
        SnapshotCompression::Zlib => SnapshotWriter::Zlib(ZlibEncoder::new(w, ZlibLevel::default())),
        SnapshotCompression::Snappy => SnapshotWriter::Snappy(snap::write::FrameEncoder::new(w)),
    }
}

impl<W: Write> Write for SnapshotWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Off(w) => w.write(buf),
            Self::Zlib(w) => w.write(buf),
            Self::Snappy(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Off(w) => w.flush(),
            Self::Zlib(w) => w.flush(),
            Self::Snappy(w) => w.flush(),
        }
    }
}

pub fn finish_writer<W: Write>(w: SnapshotWriter<W>) -> io::Result<W> {
    match w {
        SnapshotWriter::Off(w) => Ok(w),
        SnapshotWriter::Zlib(w) => w.finish(),
        SnapshotWriter::Snappy(w) => w.into_inner().map_err(|e| e.into_error()),
    }
}

pub enum SnapshotReader<R: Read> {
    Off(R),
    Zlib(ZlibDecoder<R>),
    Snappy(snap::read::FrameDecoder<R>),
}

pub fn wrap_reader<R: Read>(r: R, compression: SnapshotCompression) -> SnapshotReader<R> {
    match compression {
        SnapshotCompression::Off => SnapshotReader::Off(r),
        SnapshotCompression::Zlib => SnapshotReader::Zlib(ZlibDecoder::new(r)),
        SnapshotCompression::Snappy => SnapshotReader::Snappy(snap::read::FrameDecoder::new(r)),
    }
}

impl<R: Read> Read for SnapshotReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Off(r) => r.read(buf),
            Self::Zlib(r) => r.read(buf),
            Self::Snappy(r) => r.read(buf),
        }
    }
}

/// Compresses `data` in-place for a peer-to-peer file transfer block.
pub fn compress_block(data: &[u8], compression: FileCompression) -> Vec<u8> {
    match compression {
        FileCompression::Off => data.to_vec(),
        FileCompression::Zlib => {
            let mut enc = ZlibEncoder::new(Vec::new(), ZlibLevel::default());
            enc.write_all(data).expect("writing to a Vec cannot fail");
            enc.finish().expect("writing to a Vec cannot fail")
        }
        FileCompression::Lz4 => lz4_flex::compress_prepend_size(data),
    }
}

/// Decompresses a block produced by [`compress_block`].
pub fn decompress_block(data: &[u8], compression: FileCompression) -> io::Result<Vec<u8>> {
    match compression {
        FileCompression::Off => Ok(data.to_vec()),
        FileCompression::Zlib => {
            let mut dec = ZlibDecoder::new(data);
            let mut out = Vec::new();
            dec.read_to_end(&mut out)?;
            Ok(out)
        }
        FileCompression::Lz4 => {
            lz4_flex::decompress_size_prepended(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_round_trips_for_all_algorithms() {
        for c in [FileCompression::Off, FileCompression::Zlib, FileCompression::Lz4] {
            let data = b"the quick brown fox jumps over the lazy dog".repeat(16);
            let compressed = compress_block(&data, c);
            let restored = decompress_block(&compressed, c).unwrap();
            assert_eq!(restored, data);
        }
    }
}
