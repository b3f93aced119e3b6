//! One MySQL transaction on a pooled connection.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::{SqlValue, Transaction};
use crate::error::Result;

/// The protocol is strictly request/response; statements are serialized.
pub struct MysqlSession {
    conn: Mutex<Conn>,
}

impl MysqlSession {
    pub(super) async fn begin(mut conn: Conn) -> Result<Self> {
        conn.query_drop("START TRANSACTION").await?;
        debug!("MySQL transaction started");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Transaction for MysqlSession {
    async fn execute(&self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        let mut conn = self.conn.lock().await;
        if params.is_empty() {
            // DDL and savepoints go through the text protocol
            conn.query_drop(sql).await?;
        } else {
            let values: Vec<Value> = params.iter().map(sql_value_to_mysql).collect();
            conn.exec_drop(sql, Params::Positional(values)).await?;
        }
        Ok(conn.affected_rows())
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.get_mut().query_drop("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.get_mut().query_drop("ROLLBACK").await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // dropping the connection returns it to the pool
        Ok(())
    }
}

fn sql_value_to_mysql(value: &SqlValue<'_>) -> Value {
    match value {
        SqlValue::Null(_) => Value::NULL,
        SqlValue::Bool(b) => Value::from(*b),
        SqlValue::I16(i) => Value::from(*i),
        SqlValue::I32(i) => Value::from(*i),
        SqlValue::I64(i) => Value::from(*i),
        SqlValue::F32(f) => Value::from(*f),
        SqlValue::F64(f) => Value::from(*f),
        SqlValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
        SqlValue::Bytes(b) => Value::Bytes(b.to_vec()),
        SqlValue::Uuid(u) => Value::from(u.to_string()),
        SqlValue::Decimal(d) => Value::from(d.to_string()),
        SqlValue::DateTime(dt) => Value::from(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        SqlValue::DateTimeOffset(dto) => {
            Value::from(dto.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        }
        SqlValue::Date(d) => Value::from(d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => Value::from(t.format("%H:%M:%S%.6f").to_string()),
    }
}
