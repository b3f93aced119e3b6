//! Table references and column metadata snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identifier::{qualify, validate_identifier, QuoteStyle};
use crate::error::Result;

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Validate both parts of the name.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        if let Some(schema) = &self.schema {
            validate_identifier(schema)?;
        }
        Ok(())
    }

    /// Render as a quoted `schema.table` (or bare `table`).
    pub fn quoted(&self, style: QuoteStyle) -> Result<String> {
        qualify(self.schema.as_deref(), &self.name, style)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Column metadata as reported by a schema catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnProfile {
    /// Column name.
    pub name: String,

    /// Full declared type, usable verbatim in DDL (e.g. `nvarchar(50)`, `numeric(10,2)`).
    pub data_type: String,

    /// Whether the column is nullable.
    pub is_nullable: bool,

    /// Position in the primary key (1-based), `None` if not part of it.
    pub pk_ordinal: Option<u32>,

    /// Identity / serial / auto-increment column.
    pub is_autoincrement: bool,
}

impl ColumnProfile {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            pk_ordinal: None,
            is_autoincrement: false,
        }
    }

    pub fn primary_key(mut self, ordinal: u32) -> Self {
        self.pk_ordinal = Some(ordinal);
        self.is_nullable = false;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.is_autoincrement = true;
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.pk_ordinal.is_some()
    }
}

/// Primary key column names in key order.
pub fn primary_key_of(columns: &[ColumnProfile]) -> Vec<String> {
    let mut pk: Vec<&ColumnProfile> = columns.iter().filter(|c| c.is_primary_key()).collect();
    pk.sort_by_key(|c| c.pk_ordinal);
    pk.into_iter().map(|c| c.name.clone()).collect()
}

/// Look up a column profile by name, ignoring ASCII case.
pub fn find_column<'a>(columns: &'a [ColumnProfile], name: &str) -> Option<&'a ColumnProfile> {
    columns
        .iter()
        .find(|c| c.name == name)
        .or_else(|| columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_follows_ordinal() {
        let cols = vec![
            ColumnProfile::new("b", "int").primary_key(2),
            ColumnProfile::new("x", "text"),
            ColumnProfile::new("a", "int").primary_key(1),
        ];
        assert_eq!(primary_key_of(&cols), vec!["a", "b"]);
    }

    #[test]
    fn test_find_column_prefers_exact_case() {
        let cols = vec![
            ColumnProfile::new("itemid", "int"),
            ColumnProfile::new("ItemID", "bigint"),
        ];
        assert_eq!(find_column(&cols, "ItemID").unwrap().data_type, "bigint");
        assert_eq!(find_column(&cols, "ITEMID").unwrap().data_type, "int");
        assert!(find_column(&cols, "missing").is_none());
    }

    #[test]
    fn test_table_ref_display_and_quote() {
        let t = TableRef::new(Some("dbo"), "human");
        assert_eq!(t.to_string(), "dbo.human");
        assert_eq!(t.quoted(QuoteStyle::Bracket).unwrap(), "[dbo].[human]");
        assert!(TableRef::new(None, "").validate().is_err());
    }
}
