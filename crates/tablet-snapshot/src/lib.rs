//! Point-in-time capture and restore of a tablet partition's state (C4):
//! MANIFEST, compressed data file, and the three-file peer transfer.

mod compression;
pub mod error;
mod manifest;
mod repository;

pub use compression::{
    compress_block, decompress_block, finish_writer, wrap_reader, wrap_writer, FileCompression, SnapshotCompression,
};
pub use manifest::Manifest;
pub use repository::SnapshotRepository;
