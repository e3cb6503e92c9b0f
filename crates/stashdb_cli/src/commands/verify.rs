//! Verify command implementation.
//!
//! A dump passes when it decodes and every entry could be re-submitted:
//! table and key column are acceptable names, the key is not empty, and
//! only deletes come without a record snapshot.

use stashdb_backend::{is_attribute_name_appropriate, is_table_name_appropriate, OperationKind};
use stashdb_sync::crash_dump::{self, DumpEntry};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of files checked.
    pub files_checked: usize,
    /// Number of entries checked.
    pub entries_checked: usize,
    /// Problems found, one per line.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true if no problem was found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks every dump under `dir`.
pub fn verify_dir(dir: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    for path in crash_dump::list_dumps(dir)? {
        result.files_checked += 1;
        let entries = match crash_dump::read_dump(&path) {
            Ok(entries) => entries,
            Err(e) => {
                result.errors.push(format!("{}: {e}", path.display()));
                continue;
            }
        };
        for (i, entry) in entries.iter().enumerate() {
            result.entries_checked += 1;
            if let Some(problem) = check_entry(entry) {
                result
                    .errors
                    .push(format!("{} entry {i}: {problem}", path.display()));
            }
        }
    }
    Ok(result)
}

fn check_entry(entry: &DumpEntry) -> Option<String> {
    if !is_table_name_appropriate(&entry.table) {
        return Some(format!("inappropriate table name '{}'", entry.table));
    }
    if !is_attribute_name_appropriate(&entry.key_column) {
        return Some(format!("inappropriate key column '{}'", entry.key_column));
    }
    if entry.key.is_empty() {
        return Some("empty key".to_string());
    }
    if entry.operation_kind != OperationKind::Delete && entry.record_snapshot.is_empty() {
        return Some(format!("{} without record snapshot", entry.operation_kind));
    }
    None
}

/// Runs the verify command.
pub fn run(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying crash dumps in {:?}", dir);
    println!();

    let result = verify_dir(dir)?;
    println!("  Files checked: {}", result.files_checked);
    println!("  Entries checked: {}", result.entries_checked);
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Crash dumps verified");
        Ok(())
    } else {
        println!("✗ Crash dump verification failed");
        Err("Verification failed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::write_dump;
    use stashdb_backend::Record;
    use tempfile::TempDir;

    fn entry(kind: OperationKind, table: &str, key: &str) -> DumpEntry {
        DumpEntry {
            operation_kind: kind,
            table: table.to_string(),
            key_column: "id".to_string(),
            key: key.to_string(),
            record_snapshot: Record::new(),
        }
    }

    #[test]
    fn written_dumps_pass() {
        let dir = TempDir::new().unwrap();
        write_dump(dir.path(), "beans", 3, 2);

        let result = verify_dir(dir.path()).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.files_checked, 1);
        assert_eq!(result.entries_checked, 5);
    }

    #[test]
    fn corrupt_files_are_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json.gz"), b"garbage").unwrap();

        let result = verify_dir(dir.path()).unwrap();
        assert_eq!(result.files_checked, 1);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn entry_rules() {
        assert!(check_entry(&entry(OperationKind::Delete, "beans", "b1")).is_none());
        assert!(check_entry(&entry(OperationKind::Update, "beans", "b1")).is_some());
        assert!(check_entry(&entry(OperationKind::Delete, "ab", "b1")).is_some());
        assert!(check_entry(&entry(OperationKind::Delete, "beans", "")).is_some());
    }
}
