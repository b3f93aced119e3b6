//! Read a dataset out of PostgreSQL or Redshift.

use std::borrow::Cow;

use async_trait::async_trait;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::Row;
use tracing::debug;

use super::PostgresTarget;
use crate::core::{DatasetSource, RecordBatch, Row as DatasetRow, SqlNullType, SqlValue};
use crate::error::{Result, TransferError};

#[async_trait]
impl DatasetSource for PostgresTarget {
    async fn read_query(&self, sql: &str) -> Result<RecordBatch> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, "getting PostgreSQL source connection"))?;

        let statement = client.prepare(sql).await?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let types: Vec<Type> = statement
            .columns()
            .iter()
            .map(|c| c.type_().clone())
            .collect();
        for (name, ty) in columns.iter().zip(&types) {
            null_kind(ty).ok_or_else(|| unsupported(name, ty))?;
        }

        let rows = client
            .query(&statement, &[])
            .await?
            .iter()
            .map(|row| decode_row(row, &types))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Read {} rows x {} columns from {}",
            rows.len(),
            columns.len(),
            self.dialect
        );
        RecordBatch::new(columns, rows)
    }
}

fn unsupported(column: &str, ty: &Type) -> TransferError {
    TransferError::Config(format!(
        "source column '{}' has unsupported type {}; cast it to text in the query",
        column,
        ty.name()
    ))
}

/// Value kind for a column type, `None` if the reader cannot decode it.
fn null_kind(ty: &Type) -> Option<SqlNullType> {
    let kind = match ty.name() {
        "bool" => SqlNullType::Bool,
        "int2" => SqlNullType::I16,
        "int4" => SqlNullType::I32,
        "int8" => SqlNullType::I64,
        "float4" => SqlNullType::F32,
        "float8" => SqlNullType::F64,
        "numeric" => SqlNullType::Decimal,
        "uuid" => SqlNullType::Uuid,
        "timestamp" => SqlNullType::DateTime,
        "timestamptz" => SqlNullType::DateTimeOffset,
        "date" => SqlNullType::Date,
        "time" => SqlNullType::Time,
        "bytea" => SqlNullType::Bytes,
        "text" | "varchar" | "bpchar" | "name" | "citext" | "unknown" => SqlNullType::String,
        _ => return None,
    };
    Some(kind)
}

fn decode_row(row: &Row, types: &[Type]) -> Result<DatasetRow> {
    types
        .iter()
        .enumerate()
        .map(|(idx, ty)| decode_cell(row, idx, ty))
        .collect()
}

fn cell<'a, T, F>(row: &'a Row, idx: usize, kind: SqlNullType, wrap: F) -> Result<SqlValue<'static>>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> SqlValue<'static>,
{
    Ok(row
        .try_get::<_, Option<T>>(idx)?
        .map_or(SqlValue::Null(kind), wrap))
}

fn decode_cell(row: &Row, idx: usize, ty: &Type) -> Result<SqlValue<'static>> {
    let Some(kind) = null_kind(ty) else {
        return Err(unsupported(row.columns()[idx].name(), ty));
    };
    match kind {
        SqlNullType::Bool => cell(row, idx, kind, SqlValue::Bool),
        SqlNullType::I16 => cell(row, idx, kind, SqlValue::I16),
        SqlNullType::I32 => cell(row, idx, kind, SqlValue::I32),
        SqlNullType::I64 => cell(row, idx, kind, SqlValue::I64),
        SqlNullType::F32 => cell(row, idx, kind, SqlValue::F32),
        SqlNullType::F64 => cell(row, idx, kind, SqlValue::F64),
        SqlNullType::Decimal => cell(row, idx, kind, SqlValue::Decimal),
        SqlNullType::Uuid => cell(row, idx, kind, SqlValue::Uuid),
        SqlNullType::DateTime => cell(row, idx, kind, SqlValue::DateTime),
        SqlNullType::DateTimeOffset => cell(row, idx, kind, SqlValue::DateTimeOffset),
        SqlNullType::Date => cell(row, idx, kind, SqlValue::Date),
        SqlNullType::Time => cell(row, idx, kind, SqlValue::Time),
        SqlNullType::Bytes => cell(row, idx, kind, |b: Vec<u8>| SqlValue::Bytes(Cow::Owned(b))),
        SqlNullType::String => cell(row, idx, kind, |s: String| SqlValue::Text(Cow::Owned(s))),
    }
}
