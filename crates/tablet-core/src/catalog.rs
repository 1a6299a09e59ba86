//! Catalog refresh (spec.md §4.9, C9): a local mirror of the registry's
//! table/procedure views, rebuilt on notification.
//!
//! The registry itself (watchers on notification znodes, the name-server
//! that produces `TableMeta`) is out of scope (spec.md §1); this module
//! only specifies the node-side reaction to a notification, modeled as a
//! trait boundary so a real registry client can be plugged in later.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// A `(db, sp_name)`-keyed procedure definition mirrored from the registry
/// (spec.md §3 *Procedure info*). Immutable once observed; a changed
/// definition arrives as a new `sql` string under the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureInfo {
    pub sql: String,
    pub input_schema: Vec<String>,
    pub output_schema: Vec<String>,
    pub constants: Vec<String>,
}

/// Placeholder for a compiled plan; the real SQL compiler is out of scope
/// (spec.md §1). A single-row and a batch plan are cached per procedure.
#[derive(Debug, Clone)]
pub struct CompiledProcedure {
    pub single_row_plan: Vec<u8>,
    pub batch_plan: Vec<u8>,
}

/// Reads the children of the table-data and procedure notification paths.
/// The real implementation talks to the membership registry; tests and
/// local tooling can substitute a static map.
pub trait CatalogSource {
    fn table_meta_children(&self) -> Vec<(String, Vec<u8>)>;
    fn procedure_children(&self) -> Vec<(String, ProcedureInfo)>;
}

#[derive(Default)]
pub struct CatalogSnapshot {
    pub version: u64,
    pub table_meta: HashMap<String, Vec<u8>>,
    pub procedures: HashMap<String, ProcedureInfo>,
}

/// Rebuilds [`CatalogSnapshot`] on each notification and preserves compiled
/// plans for procedures whose `sql` is unchanged.
pub struct CatalogRefresher {
    version: AtomicU64,
    snapshot: RwLock<CatalogSnapshot>,
    compiled: RwLock<HashMap<String, CompiledProcedure>>,
}

impl CatalogRefresher {
    pub fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
            snapshot: RwLock::new(CatalogSnapshot::default()),
            compiled: RwLock::new(HashMap::new()),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Handles one notification: re-reads both paths, rebuilds the
    /// snapshot, and (re)compiles only procedures whose definition changed
    /// or is new.
    pub fn refresh(&self, source: &dyn CatalogSource, compile: impl Fn(&ProcedureInfo) -> CompiledProcedure) -> u64 {
        let table_meta: HashMap<String, Vec<u8>> = source.table_meta_children().into_iter().collect();
        let procedures: HashMap<String, ProcedureInfo> = source.procedure_children().into_iter().collect();

        let mut compiled = self.compiled.write();
        let previous = self.snapshot.read();
        let mut next_compiled = HashMap::new();
        for (name, info) in &procedures {
            let unchanged = previous.procedures.get(name) == Some(info);
            if unchanged {
                if let Some(plan) = compiled.remove(name) {
                    next_compiled.insert(name.clone(), plan);
                    continue;
                }
            }
            next_compiled.insert(name.clone(), compile(info));
        }
        drop(previous);
        *compiled = next_compiled;

        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        *self.snapshot.write() = CatalogSnapshot {
            version,
            table_meta,
            procedures,
        };
        version
    }

    pub fn compiled_procedure(&self, name: &str) -> Option<CompiledProcedure> {
        self.compiled.read().get(name).cloned()
    }

    pub fn table_meta(&self, name: &str) -> Option<Vec<u8>> {
        self.snapshot.read().table_meta.get(name).cloned()
    }
}

impl Default for CatalogRefresher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compresses a procedure payload for registry storage (spec.md §4.9
/// "Procedure payloads are Snappy-compressed").
pub fn compress_procedure_payload(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = snap::write::FrameEncoder::new(&mut out);
    encoder.write_all(bytes)?;
    encoder.flush()?;
    drop(encoder);
    Ok(out)
}

pub fn decompress_procedure_payload(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = snap::read::FrameDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
