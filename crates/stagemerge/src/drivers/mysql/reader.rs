//! Read a dataset out of MySQL.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Column, Row, Value};
use rust_decimal::Decimal;
use tracing::debug;

use super::MysqlTarget;
use crate::core::{DatasetSource, RecordBatch, Row as DatasetRow, SqlNullType, SqlValue};
use crate::error::{Result, TransferError};

/// Collation id MySQL reports for binary strings.
const BINARY_CHARSET: u16 = 63;

#[async_trait]
impl DatasetSource for MysqlTarget {
    async fn read_query(&self, sql: &str) -> Result<RecordBatch> {
        let mut conn = self.pool.get_conn().await?;

        // binary protocol, so numbers and dates arrive typed
        let mut result = conn.exec_iter(sql, ()).await?;
        let meta: Vec<Column> = result.columns_ref().to_vec();
        let raw: Vec<Row> = result.collect().await?;
        drop(result);

        let columns = meta.iter().map(|c| c.name_str().into_owned()).collect::<Vec<_>>();
        let rows = raw
            .iter()
            .map(|row| decode_row(row, &meta))
            .collect::<Result<Vec<_>>>()?;

        debug!("Read {} rows x {} columns from MySQL", rows.len(), columns.len());
        RecordBatch::new(columns, rows)
    }
}

fn decode_row(row: &Row, meta: &[Column]) -> Result<DatasetRow> {
    meta.iter()
        .enumerate()
        .map(|(idx, column)| decode_cell(row.as_ref(idx).unwrap_or(&Value::NULL), column))
        .collect()
}

fn is_binary(column: &Column) -> bool {
    column.character_set() == BINARY_CHARSET
}

fn null_kind(column: &Column) -> SqlNullType {
    match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => SqlNullType::I64,
        ColumnType::MYSQL_TYPE_FLOAT => SqlNullType::F32,
        ColumnType::MYSQL_TYPE_DOUBLE => SqlNullType::F64,
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => SqlNullType::Decimal,
        ColumnType::MYSQL_TYPE_DATE => SqlNullType::Date,
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => SqlNullType::DateTime,
        ColumnType::MYSQL_TYPE_TIME => SqlNullType::Time,
        _ if is_binary(column) => SqlNullType::Bytes,
        _ => SqlNullType::String,
    }
}

fn decode_cell(value: &Value, column: &Column) -> Result<SqlValue<'static>> {
    let invalid = || {
        TransferError::Config(format!(
            "source column '{}' holds a value that cannot be read: {:?}",
            column.name_str(),
            value
        ))
    };

    let decoded = match value {
        Value::NULL => SqlValue::Null(null_kind(column)),
        Value::Int(i) => SqlValue::I64(*i),
        Value::UInt(u) => match i64::try_from(*u) {
            Ok(i) => SqlValue::I64(i),
            Err(_) => SqlValue::Decimal(Decimal::from(*u)),
        },
        Value::Float(f) => SqlValue::F32(*f),
        Value::Double(f) => SqlValue::F64(*f),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
                .ok_or_else(invalid)?;
            if column.column_type() == ColumnType::MYSQL_TYPE_DATE {
                SqlValue::Date(date)
            } else {
                let dt = date
                    .and_hms_micro_opt(u32::from(*hour), u32::from(*minute), u32::from(*second), *micros)
                    .ok_or_else(invalid)?;
                SqlValue::DateTime(dt)
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            if *negative || *days > 0 {
                // outside time of day; keep MySQL's own rendering
                let total_hours = u64::from(*days) * 24 + u64::from(*hours);
                SqlValue::Text(Cow::Owned(format!(
                    "{}{}:{:02}:{:02}.{:06}",
                    if *negative { "-" } else { "" },
                    total_hours,
                    minutes,
                    seconds,
                    micros
                )))
            } else {
                let time = NaiveTime::from_hms_micro_opt(
                    u32::from(*hours),
                    u32::from(*minutes),
                    u32::from(*seconds),
                    *micros,
                )
                .ok_or_else(invalid)?;
                SqlValue::Time(time)
            }
        }
        Value::Bytes(bytes) => match column.column_type() {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                let text = std::str::from_utf8(bytes).map_err(|_| invalid())?;
                SqlValue::Decimal(text.parse::<Decimal>().map_err(|_| invalid())?)
            }
            _ if is_binary(column) => SqlValue::Bytes(Cow::Owned(bytes.clone())),
            _ => SqlValue::Text(Cow::Owned(String::from_utf8_lossy(bytes).into_owned())),
        },
    };
    Ok(decoded)
}
