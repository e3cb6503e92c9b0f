//! CLI command implementations.

pub mod list;
pub mod show;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing {
    use stashdb_backend::{Key, Operation, Record};
    use stashdb_sync::CrashDumper;
    use std::path::{Path, PathBuf};

    /// Writes a dump of `updates` updates and `deletes` deletes for `table`.
    pub fn write_dump(dir: &Path, table: &str, updates: usize, deletes: usize) -> PathBuf {
        let mut operations = Vec::new();
        for i in 0..updates {
            let mut record = Record::new();
            record.insert("id".into(), format!("u{i}").into());
            record.insert("label".into(), "x".into());
            operations.push(Operation::update(Key::new(table, "id", format!("u{i}")), record));
        }
        for i in 0..deletes {
            operations.push(Operation::delete(Key::new(table, "id", format!("d{i}"))));
        }
        CrashDumper::new(dir, table).dump(&operations).unwrap()
    }
}
