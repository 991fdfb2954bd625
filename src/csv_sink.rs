use std::path::Path;

use csv::WriterBuilder;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Right-pad every row with empty cells to the length of the longest row.
pub fn pad_rows(values: &[Vec<String>]) -> Vec<Vec<String>> {
    let width = values.iter().map(Vec::len).max().unwrap_or(0);
    values
        .iter()
        .map(|row| {
            let mut padded = row.clone();
            padded.resize(width, String::new());
            padded
        })
        .collect()
}

/// Write worksheet rows to `output_path` as a rectangular UTF-8 CSV file.
///
/// Returns `false` without creating a file when there are no rows, and
/// `false` when the write fails; failures are logged, never raised.
pub fn write_worksheet(values: &[Vec<String>], output_path: &Path) -> bool {
    if values.is_empty() {
        warn!("{}", Error::EmptyWorksheet(output_path.display().to_string()));
        return false;
    }

    match write_rows(values, output_path) {
        Ok(()) => {
            info!("Wrote {} rows to {}", values.len(), output_path.display());
            true
        }
        Err(e) => {
            error!("Failed to write {}: {}", output_path.display(), e);
            false
        }
    }
}

fn write_rows(values: &[Vec<String>], output_path: &Path) -> Result<()> {
    let rows = pad_rows(values);
    debug!(
        "Writing {} rows x {} columns",
        rows.len(),
        rows.first().map_or(0, Vec::len)
    );

    let mut writer = WriterBuilder::new()
        .flexible(false)
        .from_path(output_path)?;
    for row in &rows {
        writer.write_record(row)?;
    }
    writer
        .flush()
        .map_err(|e| Error::filesystem(output_path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|row| row.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_pad_rows_to_widest() {
        let padded = pad_rows(&rows(&[&["a", "b", "c"], &["d"]]));
        assert_eq!(padded, rows(&[&["a", "b", "c"], &["d", "", ""]]));
    }

    #[test]
    fn test_pad_rows_with_empty_first_row() {
        let padded = pad_rows(&rows(&[&[], &["x", "y"]]));
        assert_eq!(padded, rows(&[&["", ""], &["x", "y"]]));
    }

    #[test]
    fn test_empty_worksheet_creates_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        assert!(!write_worksheet(&[], &path));
        assert!(!path.exists());
    }

    #[test]
    fn test_writes_rectangular_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        assert!(write_worksheet(&rows(&[&["a", "b", "c"], &["d"]]), &path));
        assert_eq!(fs::read_to_string(&path).unwrap(), "a,b,c\nd,,\n");
    }

    #[test]
    fn test_quotes_special_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quoted.csv");
        let data = rows(&[&["with,comma", "say \"hi\"", "two\nlines", "ünïcödé"]]);
        assert!(write_worksheet(&data, &path));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "\"with,comma\",\"say \"\"hi\"\"\",\"two\nlines\",ünïcödé\n"
        );
    }

    #[test]
    fn test_unwritable_path_returns_false() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.csv");
        assert!(!write_worksheet(&rows(&[&["a"]]), &path));
    }
}
