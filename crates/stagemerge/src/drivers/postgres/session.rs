//! One PostgreSQL transaction on a pooled client.
//!
//! `tokio_postgres::Client` methods take `&self` and pipeline requests on the
//! connection, so concurrent chunk inserts need no extra locking.

use async_trait::async_trait;
use deadpool_postgres::Object;
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::core::{SqlNullType, SqlValue, Transaction};
use crate::error::Result;

pub struct PostgresSession {
    client: Object,
}

impl PostgresSession {
    pub(super) async fn begin(client: Object) -> Result<Self> {
        client.batch_execute("BEGIN").await?;
        debug!("PostgreSQL transaction started");
        Ok(Self { client })
    }
}

#[async_trait]
impl Transaction for PostgresSession {
    async fn execute(&self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        let boxed: Vec<Box<dyn ToSql + Sync + Send>> = params.iter().map(sql_value_to_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        Ok(self.client.execute(sql, &refs).await?)
    }

    async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // dropping the object returns it to the pool
        Ok(())
    }
}

/// Bind with the Rust type matching the placeholder's `::cast`.
fn sql_value_to_param(value: &SqlValue<'_>) -> Box<dyn ToSql + Sync + Send> {
    match value {
        SqlValue::Null(kind) => typed_null(*kind),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) => Box::new(*f),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::Text(s) => Box::new(s.to_string()),
        SqlValue::Bytes(b) => Box::new(b.to_vec()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
    }
}

fn typed_null(kind: SqlNullType) -> Box<dyn ToSql + Sync + Send> {
    match kind {
        SqlNullType::Bool => Box::new(None::<bool>),
        SqlNullType::I16 => Box::new(None::<i16>),
        SqlNullType::I32 => Box::new(None::<i32>),
        SqlNullType::I64 => Box::new(None::<i64>),
        SqlNullType::F32 => Box::new(None::<f32>),
        SqlNullType::F64 => Box::new(None::<f64>),
        SqlNullType::String => Box::new(None::<String>),
        SqlNullType::Bytes => Box::new(None::<Vec<u8>>),
        SqlNullType::Uuid => Box::new(None::<uuid::Uuid>),
        SqlNullType::Decimal => Box::new(None::<rust_decimal::Decimal>),
        SqlNullType::DateTime => Box::new(None::<chrono::NaiveDateTime>),
        SqlNullType::DateTimeOffset => Box::new(None::<chrono::DateTime<chrono::FixedOffset>>),
        SqlNullType::Date => Box::new(None::<chrono::NaiveDate>),
        SqlNullType::Time => Box::new(None::<chrono::NaiveTime>),
    }
}
