//! Seams between the transfer engine and its collaborators.
//!
//! - [`ConnectionProvider`] hands out transactions on the target database
//! - [`Transaction`] executes parameterized statements inside one transaction
//! - [`SchemaCatalog`] describes the target table's columns
//! - [`Dataset`] is the tabular source being written
//! - [`DatasetSource`] reads a dataset out of a database
//!
//! Drivers in [`crate::drivers`] implement the database-facing traits for
//! each engine.
//! The engine never holds a pool or a global connection; whoever calls it
//! passes a provider in.

use std::ops::Range;

use async_trait::async_trait;

use super::dataset::RecordBatch;
use super::schema::{primary_key_of, ColumnProfile, TableRef};
use super::value::SqlValue;
use crate::dialect::DialectId;
use crate::error::Result;

/// One dataset row, in dataset column order.
pub type Row = Vec<SqlValue<'static>>;

/// An open transaction bound to a single session.
///
/// `execute` takes `&self` so the loader can keep several statements in
/// flight on the same session. Implementations serialize or pipeline them.
/// After `commit` or `rollback` the session is back in autocommit mode,
/// which is what cleanup after a rollback relies on.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64>;

    /// Commit the transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll the transaction back.
    async fn rollback(&mut self) -> Result<()>;

    /// Release the underlying session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Source of transactions on the target database.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Native dialect of the connected engine.
    fn dialect(&self) -> DialectId;

    /// Acquire a session and begin a transaction on it.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Round-trip a trivial query.
    async fn ping(&self) -> Result<()>;
}

/// Column metadata lookup.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Columns of `table` in ordinal order. Empty if the table does not exist.
    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnProfile>>;

    /// Primary key column names in key order.
    async fn primary_key(&self, table: &TableRef) -> Result<Vec<String>> {
        Ok(primary_key_of(&self.columns(table).await?))
    }
}

/// Query runner that materializes a result set as a dataset.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Run `sql` and collect every row. Column names follow the result set;
    /// an empty result still carries them.
    async fn read_query(&self, sql: &str) -> Result<RecordBatch>;
}

/// Ordered column set plus an ordered, restartable sequence of rows.
///
/// `rows` must return the same rows for the same range on every call so
/// that chunking is deterministic.
pub trait Dataset: Send + Sync {
    fn columns(&self) -> &[String];

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows in `range`. The range is always within `0..len()`.
    fn rows(&self, range: Range<usize>) -> &[Row];
}
