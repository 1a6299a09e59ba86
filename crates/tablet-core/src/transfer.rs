//! SendSnapshot's per-file block receivers (spec.md §4.5): a three-file
//! transfer (`table_meta.txt`, data file, MANIFEST) is received one block
//! at a time into a receiver keyed by `(endpoint,tid,pid,file_name)`. The
//! wire format that carries blocks between nodes is out of scope (spec.md
//! §1); what's modeled here is the receiving side's ordering and
//! single-writer contract, and a local `send_file` that drives it the way
//! a handler would once blocks arrive off the wire.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::ErrorCode;
use crate::replicator::{Replicator, TransferKey};

/// Accepts blocks for one file transfer in strictly increasing `block_id`
/// order, appending each to `dest_path`.
pub struct FileReceiver {
    dest_path: PathBuf,
    next_block_id: AtomicU64,
    file: Mutex<File>,
}

impl FileReceiver {
    fn open(dest_path: PathBuf) -> Result<Self, ErrorCode> {
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|_| ErrorCode::FileReceiverInitFailed)?;
        }
        let file = File::create(&dest_path).map_err(|_| ErrorCode::FileReceiverInitFailed)?;
        Ok(Self {
            dest_path,
            next_block_id: AtomicU64::new(0),
            file: Mutex::new(file),
        })
    }

    /// Writes one block if `block_id` is the next expected one; out-of-order
    /// or repeated blocks are rejected rather than silently reordered.
    pub fn receive_block(&self, block_id: u64, data: &[u8]) -> Result<(), ErrorCode> {
        let expected = self.next_block_id.load(Ordering::Acquire);
        if block_id != expected {
            return Err(ErrorCode::BlockIdMismatch);
        }
        self.file.lock().write_all(data).map_err(|_| ErrorCode::ReceiveDataError)?;
        self.next_block_id.store(expected + 1, Ordering::Release);
        Ok(())
    }

    pub fn blocks_received(&self) -> u64 {
        self.next_block_id.load(Ordering::Acquire)
    }

    pub fn dest_path(&self) -> &Path {
        &self.dest_path
    }
}

/// Node-wide table of in-flight receivers, keyed the same way as
/// [`Replicator::begin_transfer`]'s sender-side guard.
#[derive(Default)]
pub struct FileReceiverTable {
    receivers: Mutex<HashMap<TransferKey, Arc<FileReceiver>>>,
}

impl FileReceiverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new receiver for `key`. Fails if one is already active —
    /// a second `SendSnapshot` of the same file must be refused, not queued.
    pub fn init(&self, key: TransferKey, dest_path: PathBuf) -> Result<Arc<FileReceiver>, ErrorCode> {
        let mut receivers = self.receivers.lock();
        if receivers.contains_key(&key) {
            return Err(ErrorCode::FileReceiverInitFailed);
        }
        let receiver = Arc::new(FileReceiver::open(dest_path)?);
        receivers.insert(key, receiver.clone());
        Ok(receiver)
    }

    pub fn get(&self, key: &TransferKey) -> Result<Arc<FileReceiver>, ErrorCode> {
        self.receivers.lock().get(key).cloned().ok_or(ErrorCode::CannotFindReceiver)
    }

    /// Frees `key`'s slot; called once a transfer completes, successfully or
    /// not, so a retry can re-`init`.
    pub fn finish(&self, key: &TransferKey) {
        self.receivers.lock().remove(key);
    }
}

/// Drives one file of a SendSnapshot transfer end to end: takes the sender
/// concurrency guard from `replicator`, registers a receiver, and feeds it
/// `source_path`'s bytes in `block_size` chunks. Stands in for the
/// off-the-wire block delivery a real RPC layer would perform.
pub fn send_file(
    replicator: &Replicator,
    receivers: &FileReceiverTable,
    endpoint: &str,
    tid: u32,
    pid: u32,
    source_path: &Path,
    dest_path: PathBuf,
    block_size: usize,
) -> Result<u64, ErrorCode> {
    let file_name = source_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(ErrorCode::FileReceiverInitFailed)?
        .to_owned();
    let key: TransferKey = (endpoint.to_owned(), tid, pid, file_name);

    let _guard = replicator.begin_transfer(key.clone())?;
    let receiver = receivers.init(key.clone(), dest_path)?;

    let mut source = File::open(source_path).map_err(|_| ErrorCode::ReceiveDataError)?;
    let mut buf = vec![0u8; block_size];
    let mut block_id = 0u64;
    loop {
        let n = source.read(&mut buf).map_err(|_| ErrorCode::ReceiveDataError)?;
        if n == 0 {
            break;
        }
        receiver.receive_block(block_id, &buf[..n])?;
        block_id += 1;
    }
    receivers.finish(&key);
    Ok(receiver.blocks_received())
}
