//! Crash dumps of operations that could not be persisted.
//!
//! Each failed flush sub-batch lands in its own gzip-compressed JSON file
//! under `<crash_dump_dir>/<table>/`, named after the UTC time of the dump
//! (`yyyy-MM-dd-HH-mm-ss-SSS.json.gz`). The content is a JSON array of
//! entries that a human or [`replay`] can re-submit.

use crate::error::SyncResult;
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use stashdb_backend::{
    BackendClient, BatchPacker, BatchWriter, Key, Operation, OperationKind, Record, WriteSummary,
};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File suffix of crash dumps.
pub const DUMP_SUFFIX: &str = ".json.gz";

/// One dumped operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpEntry {
    /// Kind of the operation.
    pub operation_kind: OperationKind,
    /// Target table.
    pub table: String,
    /// Key column.
    pub key_column: String,
    /// Logical key value.
    pub key: String,
    /// Fields the operation would have written; empty for deletes.
    pub record_snapshot: Record,
}

impl DumpEntry {
    /// Captures an operation.
    pub fn from_operation(operation: &Operation) -> Self {
        Self {
            operation_kind: operation.kind,
            table: operation.key.table.clone(),
            key_column: operation.key.column.clone(),
            key: operation.key.value.clone(),
            record_snapshot: operation.fields.clone(),
        }
    }

    /// Rebuilds the operation.
    pub fn to_operation(&self) -> Operation {
        Operation::new(
            self.operation_kind,
            Key::new(&self.table, &self.key_column, &self.key),
            self.record_snapshot.clone(),
        )
    }
}

/// Writes crash dumps for one table.
#[derive(Debug, Clone)]
pub struct CrashDumper {
    dir: PathBuf,
}

impl CrashDumper {
    /// Creates a dumper writing to `<base>/<table>/`.
    pub fn new(base: impl AsRef<Path>, table: &str) -> Self {
        Self {
            dir: base.as_ref().join(table),
        }
    }

    /// The directory dumps are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `operations` to a new dump file and returns its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn dump(&self, operations: &[Operation]) -> SyncResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let entries: Vec<DumpEntry> = operations.iter().map(DumpEntry::from_operation).collect();
        let (path, file) = self.create_file()?;

        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, &entries)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        debug!(path = %path.display(), entries = entries.len(), "crash dump written");
        Ok(path)
    }

    /// Creates a fresh file, adding a counter when the timestamp is taken.
    fn create_file(&self) -> io::Result<(PathBuf, File)> {
        let stamp = Utc::now().format("%Y-%m-%d-%H-%M-%S-%3f").to_string();
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{stamp}{DUMP_SUFFIX}")
            } else {
                format!("{stamp}-{attempt}{DUMP_SUFFIX}")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Dump files in `dir` and its immediate subdirectories, sorted by path.
///
/// # Errors
///
/// Returns an error if a directory cannot be read. A missing `dir` yields
/// an empty list.
pub fn list_dumps(dir: impl AsRef<Path>) -> SyncResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut dumps = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            for inner in fs::read_dir(&path)? {
                let inner = inner?.path();
                if is_dump(&inner) {
                    dumps.push(inner);
                }
            }
        } else if is_dump(&path) {
            dumps.push(path);
        }
    }
    dumps.sort();
    Ok(dumps)
}

fn is_dump(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(DUMP_SUFFIX))
}

/// Reads the entries of one dump file.
///
/// # Errors
///
/// Returns an error if the file is unreadable, not gzip or not a JSON
/// array of entries.
pub fn read_dump(path: impl AsRef<Path>) -> SyncResult<Vec<DumpEntry>> {
    let file = File::open(path.as_ref())?;
    let decoder = GzDecoder::new(BufReader::new(file));
    Ok(serde_json::from_reader(decoder)?)
}

/// Re-submits the operations of a dump file.
///
/// Operations are grouped by table, packed to the backend's batch cap
/// (or `batch_size`, whichever is smaller) and written in their original
/// order.
///
/// # Errors
///
/// Returns the first read or backend error. Operations of a failed call are
/// not retried.
pub fn replay(path: impl AsRef<Path>, client: Arc<dyn BackendClient>, batch_size: usize) -> SyncResult<WriteSummary> {
    let path = path.as_ref();
    let entries = read_dump(path)?;

    let mut by_table: BTreeMap<String, Vec<Operation>> = BTreeMap::new();
    for entry in &entries {
        by_table
            .entry(entry.table.clone())
            .or_default()
            .push(entry.to_operation());
    }

    let cap = batch_size.max(1);
    let cap = client.max_batch_items().map_or(cap, |max| max.min(cap));
    let mut summary = WriteSummary::default();
    for (table, operations) in by_table {
        let writer = BatchWriter::new(Arc::clone(&client), &table);
        let mut batches = BatchPacker::pack(operations, cap);
        let written = writer.write_all(&mut batches)?;
        summary.calls += written.calls;
        summary.applied += written.applied;
        summary.failed += written.failed;
    }

    info!(
        path = %path.display(),
        applied = summary.applied,
        failed = summary.failed,
        "crash dump replayed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stashdb_backend::KeyValueBackend;
    use tempfile::TempDir;

    fn key(value: &str) -> Key {
        Key::new("beans", "id", value)
    }

    fn fields(label: &str) -> Record {
        let mut record = Record::new();
        record.insert("id".into(), json!(label));
        record.insert("label".into(), json!(label));
        record
    }

    fn sample() -> Vec<Operation> {
        vec![
            Operation::update(key("a"), fields("a")),
            Operation::delete(key("b")),
        ]
    }

    #[test]
    fn dump_is_gzip_json_array() {
        let dir = TempDir::new().unwrap();
        let dumper = CrashDumper::new(dir.path(), "beans");
        let path = dumper.dump(&sample()).unwrap();

        assert!(path.starts_with(dir.path().join("beans")));
        assert!(path.to_string_lossy().ends_with(DUMP_SUFFIX));

        let raw: serde_json::Value =
            serde_json::from_reader(GzDecoder::new(File::open(&path).unwrap())).unwrap();
        assert_eq!(raw[0]["operationKind"], json!("Update"));
        assert_eq!(raw[0]["recordSnapshot"]["label"], json!("a"));
        assert_eq!(raw[1]["operationKind"], json!("Delete"));
        assert_eq!(raw[1]["key"], json!("b"));
    }

    #[test]
    fn same_millisecond_dumps_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let dumper = CrashDumper::new(dir.path(), "beans");
        let paths: Vec<_> = (0..5).map(|_| dumper.dump(&sample()).unwrap()).collect();

        let listed = list_dumps(dir.path()).unwrap();
        assert_eq!(listed.len(), 5);
        for path in paths {
            assert!(listed.contains(&path));
        }
    }

    #[test]
    fn read_back_entries() {
        let dir = TempDir::new().unwrap();
        let path = CrashDumper::new(dir.path(), "beans").dump(&sample()).unwrap();
        let entries = read_dump(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].to_operation(), sample()[0]);
        assert_eq!(entries[1].operation_kind, OperationKind::Delete);
    }

    #[test]
    fn list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(list_dumps(dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(format!("junk{DUMP_SUFFIX}"));
        fs::write(&path, b"not gzip").unwrap();
        assert!(read_dump(&path).is_err());
    }

    #[test]
    fn replay_resubmits_operations() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(KeyValueBackend::new());
        backend.insert("beans", &key("b"), fields("b"));

        let path = CrashDumper::new(dir.path(), "beans").dump(&sample()).unwrap();
        let summary = replay(&path, backend.clone(), 100).unwrap();

        assert_eq!(summary.applied, 2);
        assert_eq!(summary.failed, 0);
        assert!(backend.get_by_id("beans", &key("a")).unwrap().is_some());
        assert!(backend.get_by_id("beans", &key("b")).unwrap().is_none());
    }
}
