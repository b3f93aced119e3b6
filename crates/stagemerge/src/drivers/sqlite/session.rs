//! One SQLite transaction on a dedicated pooled connection.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::{SqlValue, Transaction};
use crate::error::Result;

/// Statements are serialized on the connection; SQLite has one writer anyway.
pub struct SqliteSession {
    conn: Mutex<PoolConnection<Sqlite>>,
}

impl SqliteSession {
    pub(super) async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN").execute(&mut *conn).await?;
        debug!("SQLite transaction started");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    async fn simple(&self, sql: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        sqlx::query(sql).execute(&mut **conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for SqliteSession {
    async fn execute(&self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, value| bind_value(query, value));

        let mut conn = self.conn.lock().await;
        let result = query.execute(&mut **conn).await?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<()> {
        self.simple("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.simple("ROLLBACK").await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // returning the connection to the pool is enough
        drop(self.conn.into_inner());
        Ok(())
    }
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &SqlValue<'_>) -> SqliteQuery<'q> {
    match value {
        SqlValue::Null(_) => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::I16(i) => query.bind(i32::from(*i)),
        SqlValue::I32(i) => query.bind(*i),
        SqlValue::I64(i) => query.bind(*i),
        SqlValue::F32(f) => query.bind(f64::from(*f)),
        SqlValue::F64(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.to_string()),
        SqlValue::Bytes(b) => query.bind(b.to_vec()),
        SqlValue::Uuid(u) => query.bind(u.to_string()),
        SqlValue::Decimal(d) => query.bind(d.to_string()),
        SqlValue::DateTime(dt) => query.bind(*dt),
        SqlValue::DateTimeOffset(dto) => query.bind(*dto),
        SqlValue::Date(d) => query.bind(*d),
        SqlValue::Time(t) => query.bind(*t),
    }
}
