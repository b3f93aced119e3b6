//! In-memory dataset.

use std::collections::HashSet;
use std::io::Read;
use std::ops::Range;
use std::path::Path;

use tracing::debug;

use super::schema::{find_column, ColumnProfile};
use super::traits::{Dataset, Row};
use super::value::{SqlNullType, SqlValue};
use crate::error::{Result, TransferError};

/// Column names plus fully materialized rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RecordBatch {
    /// Build a batch, checking that column names are unique and every row
    /// has one value per column.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Result<Self> {
        if columns.is_empty() {
            return Err(TransferError::Config(
                "dataset must have at least one column".into(),
            ));
        }

        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.to_ascii_lowercase()) {
                return Err(TransferError::Config(format!(
                    "dataset column '{}' appears more than once",
                    col
                )));
            }
        }

        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != columns.len())
        {
            return Err(TransferError::Config(format!(
                "dataset row {} has {} values, expected {}",
                idx,
                row.len(),
                columns.len()
            )));
        }

        Ok(Self { columns, rows })
    }

    /// Convenience constructor from `&str` column names.
    pub fn from_rows(columns: &[&str], rows: Vec<Row>) -> Result<Self> {
        Self::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    /// Read a headered CSV file. Every cell becomes text and empty cells become
    /// NULL; see [`RecordBatch::coerce_to`].
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let batch = Self::from_csv_reader(file)?;
        debug!(
            "Read {} rows x {} columns from {}",
            batch.rows.len(),
            batch.columns.len(),
            path.as_ref().display()
        );
        Ok(batch)
    }

    /// Read headered CSV from any reader.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let columns: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(
                record
                    .iter()
                    .map(|cell| {
                        if cell.is_empty() {
                            SqlValue::Null(SqlNullType::String)
                        } else {
                            SqlValue::text(cell)
                        }
                    })
                    .collect(),
            );
        }

        Self::new(columns, rows)
    }

    /// Convert text cells to the kinds implied by the target's declared column types.
    ///
    /// NULLs take the column's kind so typed placeholders bind them correctly.
    /// Other non-text cells are left alone. Columns with no matching profile
    /// keep their text values. A cell that cannot be parsed is a configuration
    /// error.
    pub fn coerce_to(mut self, profiles: &[ColumnProfile]) -> Result<Self> {
        let kinds: Vec<SqlNullType> = self
            .columns
            .iter()
            .map(|c| {
                find_column(profiles, c)
                    .map(|p| SqlNullType::from_declared_type(&p.data_type))
                    .unwrap_or(SqlNullType::String)
            })
            .collect();

        for (row_idx, row) in self.rows.iter_mut().enumerate() {
            for (col_idx, cell) in row.iter_mut().enumerate() {
                let kind = kinds[col_idx];
                let parsed = match &*cell {
                    SqlValue::Null(_) => SqlValue::Null(kind),
                    SqlValue::Text(_) if kind == SqlNullType::String => continue,
                    SqlValue::Text(raw) => SqlValue::parse_as(raw, kind).ok_or_else(|| {
                        TransferError::Config(format!(
                            "row {}, column '{}': cannot read {:?} as {:?}",
                            row_idx, self.columns[col_idx], raw, kind
                        ))
                    })?,
                    _ => continue,
                };
                *cell = parsed;
            }
        }

        Ok(self)
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl Dataset for RecordBatch {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn rows(&self, range: Range<usize>) -> &[Row] {
        &self.rows[range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_ragged_rows() {
        let err = RecordBatch::from_rows(
            &["a", "b"],
            vec![vec![SqlValue::I32(1), SqlValue::I32(2)], vec![SqlValue::I32(3)]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("row 1 has 1 values"));
    }

    #[test]
    fn test_rejects_duplicate_columns() {
        assert!(RecordBatch::from_rows(&["id", "ID"], vec![]).is_err());
    }

    #[test]
    fn test_csv_then_coerce() {
        let csv = "ItemID,ItemName,Quantity\n1,Laptop,12\n2,Chair,\n";
        let batch = RecordBatch::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(batch.columns(), &["ItemID", "ItemName", "Quantity"]);
        assert_eq!(batch.len(), 2);

        let profiles = vec![
            ColumnProfile::new("itemid", "INTEGER").primary_key(1),
            ColumnProfile::new("ItemName", "TEXT"),
            ColumnProfile::new("Quantity", "int"),
        ];
        let typed = batch.coerce_to(&profiles).unwrap();
        let rows = typed.rows(0..2);
        assert_eq!(rows[0][0], SqlValue::I32(1));
        assert_eq!(rows[0][1], SqlValue::text("Laptop"));
        assert_eq!(rows[1][2], SqlValue::Null(SqlNullType::I32));
    }

    #[test]
    fn test_empty_csv_cell_is_null() {
        let batch = RecordBatch::from_csv_reader("a,b\n,x\n".as_bytes()).unwrap();
        assert_eq!(batch.rows(0..1)[0][0], SqlValue::Null(SqlNullType::String));
        assert_eq!(batch.rows(0..1)[0][1], SqlValue::text("x"));
    }

    #[test]
    fn test_coerce_retypes_nulls_to_column_kind() {
        let batch = RecordBatch::from_rows(
            &["qty", "name"],
            vec![vec![
                SqlValue::Null(SqlNullType::String),
                SqlValue::Null(SqlNullType::I64),
            ]],
        )
        .unwrap();
        let typed = batch
            .coerce_to(&[
                ColumnProfile::new("qty", "bigint"),
                ColumnProfile::new("name", "text"),
            ])
            .unwrap();
        assert_eq!(typed.rows(0..1)[0][0], SqlValue::Null(SqlNullType::I64));
        assert_eq!(typed.rows(0..1)[0][1], SqlValue::Null(SqlNullType::String));
    }

    #[test]
    fn test_coerce_reports_bad_cell() {
        let batch = RecordBatch::from_csv_reader("n\nabc\n".as_bytes()).unwrap();
        let err = batch
            .coerce_to(&[ColumnProfile::new("n", "bigint")])
            .unwrap_err();
        assert!(err.to_string().contains("column 'n'"));
    }
}
