//! One SQL Server transaction on a pooled Tiberius client.

use async_trait::async_trait;
use bb8::PooledConnection;
use tiberius::Query;
use tracing::debug;

use super::TiberiusConnectionManager;
use crate::core::{SqlNullType, SqlValue, Transaction};
use crate::drivers::serial::SerialConnection;
use crate::error::{Result, TransferError};

type Conn = PooledConnection<'static, TiberiusConnectionManager>;

/// TDS allows one request at a time per connection; statements are serialized
/// and always read to completion, even when the caller is cancelled.
pub struct MssqlSession {
    conn: SerialConnection<Conn>,
}

impl MssqlSession {
    pub(super) async fn begin(mut conn: Conn) -> Result<Self> {
        conn.execute("BEGIN TRANSACTION", &[]).await?;
        debug!("MSSQL transaction started");
        Ok(Self {
            conn: SerialConnection::new(conn),
        })
    }
}

#[async_trait]
impl Transaction for MssqlSession {
    async fn execute(&self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        let mut query = Query::new(sql.to_string());
        for value in params {
            bind_value(&mut query, value);
        }

        self.conn
            .run(move |mut conn| async move {
                let result = query.execute(&mut **conn).await?;
                Ok::<_, TransferError>(result.total())
            })
            .await
    }

    async fn commit(&mut self) -> Result<()> {
        let mut conn = self.conn.finish().await;
        conn.execute("COMMIT TRANSACTION", &[]).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        // the server may already have rolled back on a severe error
        let mut conn = self.conn.finish().await;
        conn.execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION", &[])
            .await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // the last handle returns the connection to bb8
        Ok(())
    }
}

fn bind_value(query: &mut Query<'_>, value: &SqlValue<'_>) {
    match value {
        SqlValue::Null(kind) => bind_null(query, *kind),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::I16(i) => query.bind(*i),
        SqlValue::I32(i) => query.bind(*i),
        SqlValue::I64(i) => query.bind(*i),
        SqlValue::F32(f) => query.bind(*f),
        SqlValue::F64(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.to_string()),
        SqlValue::Bytes(b) => query.bind(b.to_vec()),
        SqlValue::Uuid(u) => query.bind(*u),
        SqlValue::Decimal(d) => query.bind(tiberius::numeric::Numeric::new_with_scale(
            d.mantissa(),
            d.scale() as u8,
        )),
        SqlValue::DateTime(dt) => query.bind(*dt),
        SqlValue::DateTimeOffset(dto) => query.bind(*dto),
        SqlValue::Date(d) => query.bind(*d),
        SqlValue::Time(t) => query.bind(*t),
    }
}

fn bind_null(query: &mut Query<'_>, kind: SqlNullType) {
    match kind {
        SqlNullType::Bool => query.bind(None::<bool>),
        SqlNullType::I16 => query.bind(None::<i16>),
        SqlNullType::I32 => query.bind(None::<i32>),
        SqlNullType::I64 => query.bind(None::<i64>),
        SqlNullType::F32 => query.bind(None::<f32>),
        SqlNullType::F64 => query.bind(None::<f64>),
        SqlNullType::String => query.bind(None::<String>),
        SqlNullType::Bytes => query.bind(None::<Vec<u8>>),
        SqlNullType::Uuid => query.bind(None::<uuid::Uuid>),
        SqlNullType::Decimal => query.bind(None::<tiberius::numeric::Numeric>),
        SqlNullType::DateTime => query.bind(None::<chrono::NaiveDateTime>),
        SqlNullType::DateTimeOffset => query.bind(None::<chrono::DateTime<chrono::FixedOffset>>),
        SqlNullType::Date => query.bind(None::<chrono::NaiveDate>),
        SqlNullType::Time => query.bind(None::<chrono::NaiveTime>),
    }
}
