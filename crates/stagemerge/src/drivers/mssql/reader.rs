//! Read a dataset out of SQL Server.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{ColumnData, Row};
use tracing::debug;

use super::MssqlTarget;
use crate::core::{DatasetSource, RecordBatch, Row as DatasetRow, SqlNullType, SqlValue};
use crate::error::{Result, TransferError};

#[async_trait]
impl DatasetSource for MssqlTarget {
    async fn read_query(&self, sql: &str) -> Result<RecordBatch> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, "getting MSSQL source connection"))?;

        let mut stream = conn.simple_query(sql).await?;
        let columns: Vec<String> = stream
            .columns()
            .await?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = stream
            .into_first_result()
            .await?
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>>>()?;

        debug!("Read {} rows x {} columns from MSSQL", rows.len(), columns.len());
        RecordBatch::new(columns, rows)
    }
}

fn decode_row(row: &Row) -> Result<DatasetRow> {
    row.cells()
        .enumerate()
        .map(|(idx, (_, data))| decode_cell(row, idx, data))
        .collect()
}

/// Convert one cell by its wire type. Date and time cells go through
/// Tiberius' chrono conversions.
fn decode_cell(row: &Row, idx: usize, data: &ColumnData<'static>) -> Result<SqlValue<'static>> {
    let value = match data {
        ColumnData::Bit(v) => v.map_or(SqlValue::Null(SqlNullType::Bool), SqlValue::Bool),
        ColumnData::U8(v) => v.map_or(SqlValue::Null(SqlNullType::I16), |v| {
            SqlValue::I16(i16::from(v))
        }),
        ColumnData::I16(v) => v.map_or(SqlValue::Null(SqlNullType::I16), SqlValue::I16),
        ColumnData::I32(v) => v.map_or(SqlValue::Null(SqlNullType::I32), SqlValue::I32),
        ColumnData::I64(v) => v.map_or(SqlValue::Null(SqlNullType::I64), SqlValue::I64),
        ColumnData::F32(v) => v.map_or(SqlValue::Null(SqlNullType::F32), SqlValue::F32),
        ColumnData::F64(v) => v.map_or(SqlValue::Null(SqlNullType::F64), SqlValue::F64),
        ColumnData::Guid(v) => v.map_or(SqlValue::Null(SqlNullType::Uuid), SqlValue::Uuid),
        ColumnData::String(v) => v.as_ref().map_or(SqlValue::Null(SqlNullType::String), |s| {
            SqlValue::Text(Cow::Owned(s.to_string()))
        }),
        ColumnData::Binary(v) => v.as_ref().map_or(SqlValue::Null(SqlNullType::Bytes), |b| {
            SqlValue::Bytes(Cow::Owned(b.to_vec()))
        }),
        ColumnData::Xml(v) => v.as_ref().map_or(SqlValue::Null(SqlNullType::String), |x| {
            SqlValue::Text(Cow::Owned((**x).clone().into_string()))
        }),
        ColumnData::Numeric(_) => row
            .try_get::<Decimal, _>(idx)?
            .map_or(SqlValue::Null(SqlNullType::Decimal), SqlValue::Decimal),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => row
            .try_get::<NaiveDateTime, _>(idx)?
            .map_or(SqlValue::Null(SqlNullType::DateTime), SqlValue::DateTime),
        ColumnData::DateTimeOffset(_) => row
            .try_get::<DateTime<FixedOffset>, _>(idx)?
            .map_or(SqlValue::Null(SqlNullType::DateTimeOffset), SqlValue::DateTimeOffset),
        ColumnData::Date(_) => row
            .try_get::<NaiveDate, _>(idx)?
            .map_or(SqlValue::Null(SqlNullType::Date), SqlValue::Date),
        ColumnData::Time(_) => row
            .try_get::<NaiveTime, _>(idx)?
            .map_or(SqlValue::Null(SqlNullType::Time), SqlValue::Time),
    };
    Ok(value)
}
