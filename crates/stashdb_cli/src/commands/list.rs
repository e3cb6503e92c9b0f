//! List command implementation.

use stashdb_sync::crash_dump;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One listed dump.
#[derive(Debug)]
pub struct DumpSummary {
    /// File path.
    pub path: PathBuf,
    /// Table directory the dump sits in.
    pub table: String,
    /// Compressed size in bytes.
    pub size: u64,
    /// Number of entries, `None` if unreadable.
    pub entries: Option<usize>,
}

/// Summarizes the dumps under `dir`, optionally for one table.
pub fn collect(dir: &Path, table: Option<&str>) -> Result<Vec<DumpSummary>, Box<dyn std::error::Error>> {
    let mut summaries = Vec::new();
    for path in crash_dump::list_dumps(dir)? {
        let dump_table = path
            .parent()
            .filter(|parent| *parent != dir)
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if table.is_some_and(|wanted| wanted != dump_table) {
            continue;
        }

        let size = std::fs::metadata(&path)?.len();
        let entries = match crash_dump::read_dump(&path) {
            Ok(entries) => Some(entries.len()),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "unreadable dump");
                None
            }
        };
        summaries.push(DumpSummary {
            path,
            table: dump_table,
            size,
            entries,
        });
    }
    Ok(summaries)
}

/// Runs the list command.
pub fn run(dir: &Path, table: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let summaries = collect(dir, table)?;
    if summaries.is_empty() {
        println!("No crash dumps in {:?}", dir);
        return Ok(());
    }

    println!("{:<20} {:>8} {:>10}  File", "Table", "Entries", "Bytes");
    for summary in &summaries {
        let entries = summary
            .entries
            .map_or_else(|| "unreadable".to_string(), |n| n.to_string());
        println!(
            "{:<20} {:>8} {:>10}  {}",
            summary.table,
            entries,
            summary.size,
            summary.path.display()
        );
    }
    println!();
    println!("{} dump(s)", summaries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::write_dump;
    use tempfile::TempDir;

    #[test]
    fn lists_dumps_per_table() {
        let dir = TempDir::new().unwrap();
        write_dump(dir.path(), "beans", 2, 1);
        write_dump(dir.path(), "pods", 1, 0);

        let all = collect(dir.path(), None).unwrap();
        assert_eq!(all.len(), 2);

        let beans = collect(dir.path(), Some("beans")).unwrap();
        assert_eq!(beans.len(), 1);
        assert_eq!(beans[0].table, "beans");
        assert_eq!(beans[0].entries, Some(3));
        assert!(beans[0].size > 0);
    }

    #[test]
    fn unreadable_dumps_are_listed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json.gz"), b"nope").unwrap();

        let all = collect(dir.path(), None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].entries, None);
        assert_eq!(all[0].table, "");
    }
}
