//! PostgreSQL driver.
//!
//! - [`PostgresTarget`]: deadpool-backed connection provider and catalog
//! - [`PostgresSession`]: one transaction on a pooled client
//!
//! Redshift speaks the same wire protocol and reuses this driver with the
//! `redshift` dialect.

mod reader;
mod session;

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{info, warn};

use crate::config::TargetConfig;
use crate::core::{ColumnProfile, ConnectionProvider, SchemaCatalog, TableRef, Transaction};
use crate::dialect::DialectId;
use crate::error::{Result, TransferError};

pub use session::PostgresSession;

const DEFAULT_PORT: u16 = 5432;
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL (or Redshift) database as a transfer target.
#[derive(Clone)]
pub struct PostgresTarget {
    pool: Pool,
    dialect: DialectId,
}

impl PostgresTarget {
    /// Build the pool and check that a connection can be made.
    pub async fn connect(config: &TargetConfig, dialect: DialectId) -> Result<Self> {
        let port = config.port_or_default(DEFAULT_PORT);

        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        warn!("PostgreSQL TLS is not configured. Credentials will be transmitted in plaintext.");
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| TransferError::pool(e, "creating PostgreSQL target pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, "testing PostgreSQL target connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to {} target: {}:{}/{}",
            dialect, config.host, port, config.database
        );

        Ok(Self { pool, dialect })
    }
}

/// Column profile query for `$1` table name, `$2` optional schema.
///
/// PostgreSQL reads key order from `pg_index.indkey` and identity from
/// `attidentity`. Redshift has neither `array_position` nor `attidentity`, so
/// it reads key order from `pg_constraint.conkey` by subscript.
fn catalog_sql(dialect: DialectId) -> &'static str {
    match dialect {
        DialectId::Redshift => REDSHIFT_CATALOG_SQL,
        _ => POSTGRES_CATALOG_SQL,
    }
}

const POSTGRES_CATALOG_SQL: &str = "\
SELECT a.attname::text AS name, \
       format_type(a.atttypid, a.atttypmod) AS data_type, \
       NOT a.attnotnull AS is_nullable, \
       array_position(i.indkey::int2[], a.attnum) AS pk_ordinal, \
       a.attidentity <> '' AS is_identity \
FROM pg_catalog.pg_attribute a \
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
LEFT JOIN pg_catalog.pg_index i ON i.indrelid = c.oid AND i.indisprimary \
WHERE c.relname = $1 \
  AND n.nspname = COALESCE($2::text, current_schema()) \
  AND a.attnum > 0 \
  AND NOT a.attisdropped \
ORDER BY a.attnum";

const REDSHIFT_CATALOG_SQL: &str = "\
SELECT a.attname::text AS name, \
       format_type(a.atttypid, a.atttypmod) AS data_type, \
       NOT a.attnotnull AS is_nullable, \
       pk.ordinal AS pk_ordinal, \
       false AS is_identity \
FROM pg_catalog.pg_attribute a \
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
LEFT JOIN ( \
    SELECT con.conrelid, con.conkey[s.i] AS attnum, s.i AS ordinal \
    FROM pg_catalog.pg_constraint con \
    CROSS JOIN generate_series(1, 32) AS s(i) \
    WHERE con.contype = 'p' AND con.conkey[s.i] IS NOT NULL \
) pk ON pk.conrelid = c.oid AND pk.attnum = a.attnum \
WHERE c.relname = $1 \
  AND n.nspname = COALESCE($2::text, current_schema()) \
  AND a.attnum > 0 \
  AND NOT a.attisdropped \
ORDER BY a.attnum";

#[async_trait]
impl ConnectionProvider for PostgresTarget {
    fn dialect(&self) -> DialectId {
        self.dialect
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, "getting PostgreSQL connection"))?;
        Ok(Box::new(PostgresSession::begin(client).await?))
    }

    async fn ping(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, "testing PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaCatalog for PostgresTarget {
    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnProfile>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, "getting PostgreSQL connection"))?;

        let rows = client
            .query(
                catalog_sql(self.dialect),
                &[&table.name, &table.schema],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<ColumnProfile> {
                let pk: Option<i32> = row.try_get("pk_ordinal")?;
                Ok(ColumnProfile {
                    name: row.try_get("name")?,
                    data_type: row.try_get("data_type")?,
                    is_nullable: row.try_get("is_nullable")?,
                    pk_ordinal: pk.map(|p| p as u32),
                    is_autoincrement: row.try_get("is_identity")?,
                })
            })
            .collect()
    }
}
