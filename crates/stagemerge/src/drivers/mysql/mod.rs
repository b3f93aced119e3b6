//! MySQL / MariaDB driver.
//!
//! - [`MysqlTarget`]: mysql_async pool, connection provider and catalog
//! - [`MysqlSession`]: one transaction on a pooled connection

mod reader;
mod session;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};
use tracing::info;

use crate::config::TargetConfig;
use crate::core::{ColumnProfile, ConnectionProvider, SchemaCatalog, TableRef, Transaction};
use crate::dialect::DialectId;
use crate::error::{Result, TransferError};

pub use session::MysqlSession;

const DEFAULT_PORT: u16 = 3306;

const CATALOG_SQL: &str = "\
SELECT c.COLUMN_NAME, c.COLUMN_TYPE, c.IS_NULLABLE, k.ORDINAL_POSITION, c.EXTRA \
FROM information_schema.COLUMNS c \
LEFT JOIN information_schema.KEY_COLUMN_USAGE k \
  ON k.TABLE_SCHEMA = c.TABLE_SCHEMA AND k.TABLE_NAME = c.TABLE_NAME \
 AND k.COLUMN_NAME = c.COLUMN_NAME AND k.CONSTRAINT_NAME = 'PRIMARY' \
WHERE c.TABLE_SCHEMA = COALESCE(?, DATABASE()) AND c.TABLE_NAME = ? \
ORDER BY c.ORDINAL_POSITION";

/// MySQL database as a transfer target.
#[derive(Clone)]
pub struct MysqlTarget {
    pool: Pool,
}

impl MysqlTarget {
    /// Build the pool and check that a connection can be made.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let port = config.port_or_default(DEFAULT_PORT);
        let builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        let constraints = PoolConstraints::new(1, config.max_connections).ok_or_else(|| {
            TransferError::Config("target.max_connections must be at least 1".into())
        })?;
        let pool_opts = PoolOpts::new().with_constraints(constraints);

        let opts: Opts = builder.pool_opts(pool_opts).into();
        let pool = Pool::new(opts);

        // Test connection
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| TransferError::pool(e, "creating MySQL target pool"))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| TransferError::pool(e, "testing MySQL target connection"))?;
        drop(conn);

        info!(
            "Connected to MySQL target: {}:{}/{}",
            config.host, port, config.database
        );
        Ok(Self { pool })
    }
}

#[async_trait]
impl ConnectionProvider for MysqlTarget {
    fn dialect(&self) -> DialectId {
        DialectId::Mysql
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| TransferError::pool(e, "getting MySQL connection"))?;
        Ok(Box::new(MysqlSession::begin(conn).await?))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| TransferError::pool(e, "testing MySQL connection"))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| TransferError::pool(e, "testing MySQL connection"))?;
        Ok(())
    }
}

#[async_trait]
impl SchemaCatalog for MysqlTarget {
    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnProfile>> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| TransferError::pool(e, "getting MySQL connection"))?;

        let rows: Vec<(String, String, String, Option<u32>, String)> = conn
            .exec(CATALOG_SQL, (table.schema.clone(), table.name.clone()))
            .await?;

        Ok(rows
            .into_iter()
            .map(|(name, column_type, nullable, pk, extra)| ColumnProfile {
                name,
                data_type: column_type,
                is_nullable: nullable.eq_ignore_ascii_case("YES"),
                pk_ordinal: pk,
                is_autoincrement: extra.to_ascii_lowercase().contains("auto_increment"),
            })
            .collect())
    }
}
