//! In-memory tabular dataset built from an uploaded CSV file.
//!
//! Parsing is intentionally naive: lines are split on `\n`/`\r\n` and cells on
//! `,`. There is no quoting or escaping support.

use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Number of rows shown in a data preview.
pub const PREVIEW_ROWS: usize = 5;

/// Errors raised while ingesting a CSV file. The messages are shown to the
/// user as-is, so they read as sentences.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Invalid file type. Please upload a .csv file.")]
    InvalidFileType,

    #[error("Failed to read the file.")]
    Read(#[from] std::io::Error),

    #[error("CSV file must have a header and at least one row of data.")]
    MissingRows,

    #[error("Inconsistent number of columns in CSV data. Please check your file.")]
    InconsistentColumns {
        /// 1-based line number of the offending row.
        line: usize,
        expected: usize,
        found: usize,
    },
}

/// Rectangular headers + rows representation of a CSV file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabularDataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// First few rows of a dataset, as shown next to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetPreview {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
}

impl TabularDataset {
    /// Builds a dataset, checking that there is a header and at least one row
    /// and that every row is as wide as the header.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DatasetError> {
        if headers.is_empty() || rows.is_empty() {
            return Err(DatasetError::MissingRows);
        }
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != headers.len())
        {
            return Err(DatasetError::InconsistentColumns {
                // header is line 1
                line: idx + 2,
                expected: headers.len(),
                found: row.len(),
            });
        }
        Ok(Self { headers, rows })
    }

    /// Parses CSV text with naive comma splitting. Cells are trimmed.
    pub fn from_csv_text(text: &str) -> Result<Self, DatasetError> {
        let lines: Vec<&str> = text.trim().lines().collect();
        if lines.len() < 2 {
            return Err(DatasetError::MissingRows);
        }

        let split = |line: &str| -> Vec<String> {
            line.split(',').map(|cell| cell.trim().to_string()).collect()
        };

        let headers = split(lines[0]);
        let rows = lines[1..].iter().map(|line| split(line)).collect();
        Self::new(headers, rows)
    }

    /// Reads and parses a `.csv` file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        if !has_csv_extension(path) {
            return Err(DatasetError::InvalidFileType);
        }

        let text = std::fs::read_to_string(path)?;
        let dataset = Self::from_csv_text(&text)?;
        tracing::debug!(
            path = %path.display(),
            columns = dataset.headers.len(),
            rows = dataset.rows.len(),
            "Loaded CSV dataset"
        );
        Ok(dataset)
    }

    /// Parses the content of an uploaded file, rejecting names that do not
    /// end in `.csv`.
    pub fn from_upload(file_name: &str, text: &str) -> Result<Self, DatasetError> {
        if !has_csv_extension(Path::new(file_name)) {
            return Err(DatasetError::InvalidFileType);
        }
        Self::from_csv_text(text)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() || self.rows.is_empty()
    }

    /// Header line followed by the newline-joined, comma-joined rows.
    pub fn to_csv_string(&self) -> String {
        let mut out = self.headers.join(",");
        for row in &self.rows {
            out.push('\n');
            out.push_str(&row.join(","));
        }
        out
    }

    pub fn preview(&self, max_rows: usize) -> DatasetPreview {
        DatasetPreview {
            headers: self.headers.clone(),
            rows: self.rows.iter().take(max_rows).cloned().collect(),
            total_rows: self.rows.len(),
        }
    }
}

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

impl DatasetPreview {
    /// Caption like "Showing first 5 of 120 rows".
    pub fn caption(&self) -> String {
        format!(
            "Showing first {} of {} rows",
            self.rows.len(),
            self.total_rows
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_cells_and_handles_crlf() {
        let ds = TabularDataset::from_csv_text("product, sales\r\nA ,10\r\nB, 20\r\n").unwrap();
        assert_eq!(ds.headers(), &["product".to_string(), "sales".to_string()]);
        assert_eq!(ds.rows()[0], vec!["A".to_string(), "10".to_string()]);
        assert_eq!(ds.rows()[1], vec!["B".to_string(), "20".to_string()]);
        assert_eq!(ds.row_count(), 2);
    }

    #[test]
    fn test_header_only_is_rejected() {
        let err = TabularDataset::from_csv_text("a,b,c\n").unwrap_err();
        assert!(matches!(err, DatasetError::MissingRows));
        assert_eq!(
            err.to_string(),
            "CSV file must have a header and at least one row of data."
        );
    }

    #[test]
    fn test_ragged_row_reports_line() {
        let err = TabularDataset::from_csv_text("a,b\n1,2\n3\n").unwrap_err();
        match err {
            DatasetError::InconsistentColumns { line, expected, found } => {
                assert_eq!(line, 3);
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_csv_string_round_trip_shape() {
        let ds = TabularDataset::new(
            vec!["product".into(), "sales".into()],
            vec![vec!["A".into(), "10".into()], vec!["B".into(), "20".into()]],
        )
        .unwrap();
        assert_eq!(ds.to_csv_string(), "product,sales\nA,10\nB,20");
    }

    #[test]
    fn test_preview_caps_rows() {
        let text = (0..8).fold(String::from("n"), |mut acc, i| {
            acc.push_str(&format!("\n{i}"));
            acc
        });
        let ds = TabularDataset::from_csv_text(&text).unwrap();
        let preview = ds.preview(PREVIEW_ROWS);
        assert_eq!(preview.rows.len(), 5);
        assert_eq!(preview.total_rows, 8);
        assert_eq!(preview.caption(), "Showing first 5 of 8 rows");
    }

    #[test]
    fn test_from_path_rejects_non_csv() {
        let err = TabularDataset::from_path("data.txt").unwrap_err();
        assert!(matches!(err, DatasetError::InvalidFileType));
    }

    #[test]
    fn test_from_upload_checks_name() {
        assert!(matches!(
            TabularDataset::from_upload("sales.xlsx", "a\n1"),
            Err(DatasetError::InvalidFileType)
        ));
        let ds = TabularDataset::from_upload("Sales.CSV", "a\n1").unwrap();
        assert_eq!(ds.row_count(), 1);
    }
}
