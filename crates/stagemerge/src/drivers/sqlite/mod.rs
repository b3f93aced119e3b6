//! SQLite target driver.
//!
//! Uses sqlx with a small connection pool. Each transfer takes one pooled
//! connection for its whole transaction, so session-scoped `TEMP` staging
//! tables stay visible to every statement of the transfer.

mod session;
mod source;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::core::{ColumnProfile, ConnectionProvider, SchemaCatalog, TableRef, Transaction};
use crate::dialect::DialectId;
use crate::error::Result;

pub use session::SqliteSession;

const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite database file as a transfer target.
#[derive(Clone)]
pub struct SqliteTarget {
    pool: SqlitePool,
}

impl SqliteTarget {
    /// Open (or create) the database file at `path`.
    pub async fn connect(path: &Path, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        info!(
            "Connected to SQLite target: {} (pool_size={})",
            path.display(),
            max_connections
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionProvider for SqliteTarget {
    fn dialect(&self) -> DialectId {
        DialectId::Sqlite
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(SqliteSession::begin(&self.pool).await?))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaCatalog for SqliteTarget {
    /// Columns from `pragma_table_info`. Rowid aliases accept explicit
    /// values, so no column is reported as autoincrement.
    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnProfile>> {
        let rows = match &table.schema {
            Some(schema) => {
                sqlx::query(
                    "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1, ?2) ORDER BY cid",
                )
                .bind(table.name.as_str())
                .bind(schema.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
                )
                .bind(table.name.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| -> Result<ColumnProfile> {
                let not_null: i64 = row.try_get("notnull")?;
                let pk: i64 = row.try_get("pk")?;
                Ok(ColumnProfile {
                    name: row.try_get("name")?,
                    data_type: row.try_get("type")?,
                    is_nullable: not_null == 0,
                    pk_ordinal: (pk > 0).then_some(pk as u32),
                    is_autoincrement: false,
                })
            })
            .collect()
    }
}
