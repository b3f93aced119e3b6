//! Identifier validation and quoting.
//!
//! Table, schema and column names cannot be bound as statement parameters, so
//! every generated statement splices them in as text. All of that text passes
//! through this module: names are validated, then wrapped in the dialect's
//! quote characters with the closing quote doubled. A quoted name is always a
//! single opaque token; no caller-supplied name can end a statement or inject
//! a keyword.

use crate::error::{Result, TransferError};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - SQL Server: 128 characters
/// - MySQL: 64 characters
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Quoting convention of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// `[name]` (SQL Server)
    Bracket,
    /// `"name"` (ANSI, PostgreSQL, SQLite)
    DoubleQuote,
    /// `` `name` `` (MySQL, MariaDB)
    Backtick,
}

impl QuoteStyle {
    fn delimiters(self) -> (char, char) {
        match self {
            QuoteStyle::Bracket => ('[', ']'),
            QuoteStyle::DoubleQuote => ('"', '"'),
            QuoteStyle::Backtick => ('`', '`'),
        }
    }
}

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than [`MAX_IDENTIFIER_LENGTH`] bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TransferError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TransferError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(TransferError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote an identifier in the given style.
///
/// # Examples
///
/// ```
/// use stagemerge::core::{quote_ident, QuoteStyle};
///
/// assert_eq!(quote_ident("users", QuoteStyle::Bracket).unwrap(), "[users]");
/// assert_eq!(quote_ident("a\"b", QuoteStyle::DoubleQuote).unwrap(), "\"a\"\"b\"");
/// ```
pub fn quote_ident(name: &str, style: QuoteStyle) -> Result<String> {
    validate_identifier(name)?;
    let (open, close) = style.delimiters();
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push(open);
    for c in name.chars() {
        if c == close {
            escaped.push(close);
        }
        escaped.push(c);
    }
    escaped.push(close);
    Ok(escaped)
}

/// Quote a list of identifiers and join them with `, `.
pub fn quote_list(names: &[String], style: QuoteStyle) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| quote_ident(n, style))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Qualify a table name with an optional schema.
pub fn qualify(schema: Option<&str>, table: &str, style: QuoteStyle) -> Result<String> {
    match schema {
        Some(s) => Ok(format!(
            "{}.{}",
            quote_ident(s, style)?,
            quote_ident(table, style)?
        )),
        None => quote_ident(table, style),
    }
}
