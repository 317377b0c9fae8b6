//! Raw CSV table: headers plus string cells, nothing interpreted yet

use crate::error::{Result, SchemaError};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Identifier column names, in order of preference
pub const ID_COLUMNS: [&str; 2] = ["uniqID", "id"];
pub const INPUT_PREFIX: &str = "input_";
pub const LABEL_PREFIX: &str = "label_";
pub const IMAGE_COLUMN: &str = "imgpath";
pub const PERIOD_COLUMN: &str = "periods";
pub const SPLIT_COLUMN: &str = "split";
pub const GROUP_COLUMN: &str = "group";

#[derive(Debug, Clone)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    /// Directory relative image paths are resolved against
    base_dir: Option<PathBuf>,
}

impl RawTable {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mut table = Self::from_reader(file)?;
        table.base_dir = path.parent().map(Path::to_path_buf);
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for (i, record) in csv_reader.records().enumerate() {
            let record = record?;
            if record.len() != headers.len() {
                return Err(SchemaError::RaggedRow {
                    line: i + 2,
                    expected: headers.len(),
                    found: record.len(),
                }
                .into());
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self {
            headers,
            rows,
            base_dir: None,
        })
    }

    /// Build a table in memory (headers and rows must agree in width)
    pub fn from_rows(headers: &[&str], rows: &[&[&str]]) -> Result<Self> {
        let csv_text = std::iter::once(headers.join(","))
            .chain(rows.iter().map(|r| r.join(",")))
            .collect::<Vec<_>>()
            .join("\n");
        Self::from_reader(csv_text.as_bytes())
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Columns whose name starts with `prefix`, in declaration order
    pub fn columns_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|h| h.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn id_column(&self) -> Option<&str> {
        ID_COLUMNS
            .iter()
            .copied()
            .find(|c| self.column_index(c).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers_and_rows() {
        let table = RawTable::from_rows(
            &["uniqID", "input_age", "label_a", "split"],
            &[&["p1", "50", "0", "train"], &["p2", "61", "1", "val"]],
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.column_index("label_a"), Some(2));
        assert_eq!(table.columns_with_prefix(INPUT_PREFIX), vec!["input_age"]);
        assert_eq!(table.id_column(), Some("uniqID"));
    }

    #[test]
    fn test_ragged_row_reports_line() {
        let csv = "id,label_a,split\np1,0,train\np2,1\n";
        let err = RawTable::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Schema(SchemaError::RaggedRow { line: 3, .. })
        ));
    }

    #[test]
    fn test_cells_are_trimmed() {
        let csv = "id, label_a ,split\np1, 1 ,train\n";
        let table = RawTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.headers()[1], "label_a");
        assert_eq!(table.rows()[0][1], "1");
    }
}
