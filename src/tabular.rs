//! CSV and report file helpers.
//!
//! Pipeline stages exchange tables as header -> value maps so that each stage
//! can carry whichever columns its sources happen to provide. Unknown fields
//! are dropped on write, missing fields become empty cells.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{ConcordError, Result};

/// A row keyed by column name.
pub type RowMap = BTreeMap<String, String>;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write rows as CSV with a fixed column order.
pub fn write_csv(path: &Path, fieldnames: &[&str], rows: &[RowMap]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(fieldnames)?;
    for row in rows {
        let record: Vec<&str> = fieldnames
            .iter()
            .map(|f| row.get(*f).map(String::as_str).unwrap_or(""))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a CSV with a header row into (headers, rows).
pub fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<RowMap>)> {
    if !path.is_file() {
        return Err(ConcordError::InputNotFound(path.to_path_buf()));
    }
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows: Vec<RowMap> = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = RowMap::new();
        for (i, header) in headers.iter().enumerate() {
            row.insert(
                header.clone(),
                record.get(i).unwrap_or("").to_string(),
            );
        }
        rows.push(row);
    }
    Ok((headers, rows))
}

/// Write a markdown (or any text) report, creating parent directories.
pub fn write_text(path: &Path, content: &str) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_csv_round_trip_with_fixed_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        let mut row = RowMap::new();
        row.insert("b".to_string(), "2".to_string());
        row.insert("a".to_string(), "1".to_string());
        row.insert("ignored".to_string(), "x".to_string());
        write_csv(&path, &["a", "b", "c"], &[row]).unwrap();

        let (headers, rows) = read_csv(&path).unwrap();
        assert_eq!(headers, vec!["a", "b", "c"]);
        assert_eq!(rows[0].get("a").map(String::as_str), Some("1"));
        assert_eq!(rows[0].get("c").map(String::as_str), Some(""));
        assert!(rows[0].get("ignored").is_none());
    }

    #[test]
    fn test_read_missing_csv() {
        let dir = tempdir().unwrap();
        assert!(read_csv(&dir.path().join("absent.csv")).is_err());
    }
}
