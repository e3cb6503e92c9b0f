//! Show command implementation.

use stashdb_sync::crash_dump::{self, DumpEntry};
use std::path::Path;

/// Renders entries as text, one operation per line.
pub fn render_text(entries: &[DumpEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        let fields = if entry.record_snapshot.is_empty() {
            String::new()
        } else {
            serde_json::Value::Object(entry.record_snapshot.clone().into_iter().collect()).to_string()
        };
        out.push_str(&format!(
            "{:>4}  {:<6} {}.{}={} {}\n",
            i,
            entry.operation_kind,
            entry.table,
            entry.key_column,
            entry.key,
            fields
        ));
    }
    out
}

/// Runs the show command.
pub fn run(file: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = crash_dump::read_dump(file)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        "text" => {
            println!("{} ({} entries)", file.display(), entries.len());
            print!("{}", render_text(&entries));
        }
        other => return Err(format!("Unknown format '{other}', expected text or json").into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::write_dump;
    use tempfile::TempDir;

    #[test]
    fn text_lists_every_operation() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(dir.path(), "beans", 1, 1);
        let text = render_text(&crash_dump::read_dump(&path).unwrap());

        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Update"));
        assert!(lines[0].contains("beans.id=u0"));
        assert!(lines[0].contains("\"label\":\"x\""));
        assert!(lines[1].contains("Delete"));
        assert!(lines[1].contains("beans.id=d0"));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(dir.path(), "beans", 1, 0);
        assert!(run(&path, "yaml").is_err());
    }
}
