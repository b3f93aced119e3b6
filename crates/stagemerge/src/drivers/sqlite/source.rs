//! Read a dataset out of a SQLite database.

use std::borrow::Cow;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::debug;

use super::SqliteTarget;
use crate::core::{Dataset, DatasetSource, RecordBatch, Row as DatasetRow, SqlNullType, SqlValue};
use crate::error::Result;

impl RecordBatch {
    /// Run `query` against the SQLite file at `path` and materialize the result.
    ///
    /// Cells keep SQLite's storage class: INTEGER, REAL, TEXT or BLOB. Use
    /// [`RecordBatch::coerce_to`] to type text cells for the target.
    pub async fn from_sqlite_query(path: &Path, query: &str) -> Result<Self> {
        let mut conn: SqliteConnection = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .connect()
            .await?;

        let batch = read_rows(&mut conn, query).await?;
        conn.close().await?;
        debug!(
            "Read {} rows x {} columns from {}",
            batch.len(),
            batch.columns().len(),
            path.display()
        );
        Ok(batch)
    }
}

#[async_trait]
impl DatasetSource for SqliteTarget {
    async fn read_query(&self, sql: &str) -> Result<RecordBatch> {
        let mut conn = self.pool().acquire().await?;
        read_rows(&mut *conn, sql).await
    }
}

async fn read_rows(conn: &mut SqliteConnection, query: &str) -> Result<RecordBatch> {
    let columns: Vec<String> = conn
        .prepare(query)
        .await?
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let rows = sqlx::query(query)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| decode_row(row, columns.len()))
        .collect::<Result<Vec<_>>>()?;

    RecordBatch::new(columns, rows)
}

fn decode_row(row: &SqliteRow, width: usize) -> Result<DatasetRow> {
    (0..width).map(|idx| decode_cell(row, idx)).collect()
}

fn decode_cell(row: &SqliteRow, idx: usize) -> Result<SqlValue<'static>> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(SqlValue::Null(SqlNullType::String));
    }
    let storage = raw.type_info().name().to_ascii_uppercase();

    let value = match storage.as_str() {
        "INTEGER" => SqlValue::I64(row.try_get(idx)?),
        "REAL" => SqlValue::F64(row.try_get(idx)?),
        "BLOB" => SqlValue::Bytes(Cow::Owned(row.try_get::<Vec<u8>, _>(idx)?)),
        _ => SqlValue::Text(Cow::Owned(row.try_get::<String, _>(idx)?)),
    };
    Ok(value)
}
