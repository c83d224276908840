//! Manual layout file reader.
//!
//! One line per panel row, bottom row first. Each whitespace-separated
//! entry names a job; a trailing `!` requests the 90°-rotated orientation:
//!
//! ```text
//! # bottom row: two boards side by side, second one rotated
//! mainboard sensor!
//! mainboard
//! ```

use crate::PlaceError;
use std::fs;
use std::path::Path;

/// One job slot in a layout row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub name: String,
    pub rotated: bool,
}

/// Parse a layout file into rows of entries. Blank lines and `#` comments
/// are skipped; job names are validated by the placement builder.
pub fn parse_layout(path: &Path) -> Result<Vec<Vec<LayoutEntry>>, PlaceError> {
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|token| match token.strip_suffix('!') {
                Some(name) => LayoutEntry {
                    name: name.to_string(),
                    rotated: true,
                },
                None => LayoutEntry {
                    name: token.to_string(),
                    rotated: false,
                },
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rows_and_rotation_markers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.layout");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "main sensor!").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "main").unwrap();
        drop(f);

        let rows = parse_layout(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            vec![
                LayoutEntry { name: "main".into(), rotated: false },
                LayoutEntry { name: "sensor".into(), rotated: true },
            ]
        );
        assert_eq!(rows[1].len(), 1);
    }
}
