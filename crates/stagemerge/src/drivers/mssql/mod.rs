//! Microsoft SQL Server driver.
//!
//! - [`MssqlTarget`]: bb8 pool of Tiberius clients, connection provider and catalog
//! - [`MssqlSession`]: one explicit transaction on a pooled client

mod reader;
mod session;

use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::info;

use crate::config::TargetConfig;
use crate::core::{ColumnProfile, ConnectionProvider, SchemaCatalog, TableRef, Transaction};
use crate::dialect::DialectId;
use crate::error::{Result, TransferError};

pub use session::MssqlSession;

const DEFAULT_PORT: u16 = 1433;

/// Connection pool timeouts.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

const CATALOG_SQL: &str = "\
SELECT c.name, TYPE_NAME(c.user_type_id) AS type_name, c.max_length, c.precision, c.scale, \
       c.is_nullable, ic.key_ordinal, c.is_identity \
FROM sys.columns c \
JOIN sys.tables t ON t.object_id = c.object_id \
JOIN sys.schemas s ON s.schema_id = t.schema_id \
LEFT JOIN sys.indexes i ON i.object_id = t.object_id AND i.is_primary_key = 1 \
LEFT JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
     AND ic.column_id = c.column_id \
WHERE t.name = @P1 AND s.name = COALESCE(@P2, SCHEMA_NAME()) \
ORDER BY c.column_id";

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: TargetConfig,
}

impl TiberiusConnectionManager {
    pub fn new(config: TargetConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port_or_default(DEFAULT_PORT));
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.trust_server_cert {
            config.trust_cert();
        }
        if self.config.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }
        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;
        tcp.set_nodelay(true).ok();
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server database as a transfer target.
#[derive(Clone)]
pub struct MssqlTarget {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlTarget {
    /// Build the pool and check that a connection can be made.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let max_size = config.max_connections as u32;
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| TransferError::pool(e, "creating MSSQL target pool"))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| TransferError::pool(e, "testing MSSQL target connection"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL target: {}:{}/{} (pool_size={})",
            config.host,
            config.port_or_default(DEFAULT_PORT),
            config.database,
            max_size
        );

        Ok(Self { pool })
    }
}

#[async_trait]
impl ConnectionProvider for MssqlTarget {
    fn dialect(&self) -> DialectId {
        DialectId::Mssql
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| TransferError::pool(e, "getting MSSQL connection"))?;
        Ok(Box::new(MssqlSession::begin(conn).await?))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, "testing MSSQL connection"))?;
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaCatalog for MssqlTarget {
    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnProfile>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TransferError::pool(e, "getting MSSQL connection"))?;

        let mut query = Query::new(CATALOG_SQL);
        query.bind(table.name.clone());
        query.bind(table.schema.clone());
        let rows = query.query(&mut *conn).await?.into_first_result().await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: &str = row.try_get(0)?.unwrap_or_default();
            let type_name: &str = row.try_get(1)?.unwrap_or_default();
            let max_length: i16 = row.try_get(2)?.unwrap_or(0);
            let precision: u8 = row.try_get(3)?.unwrap_or(0);
            let scale: u8 = row.try_get(4)?.unwrap_or(0);
            let is_nullable: bool = row.try_get(5)?.unwrap_or(true);
            let key_ordinal: Option<u8> = row.try_get(6)?;
            let is_identity: bool = row.try_get(7)?.unwrap_or(false);

            columns.push(ColumnProfile {
                name: name.to_string(),
                data_type: format_mssql_type(type_name, max_length, precision, scale),
                is_nullable,
                pk_ordinal: key_ordinal.map(u32::from),
                is_autoincrement: is_identity,
            });
        }
        Ok(columns)
    }
}

/// Render a full column type (`nvarchar(50)`, `decimal(10,2)`) from sys.columns metadata.
fn format_mssql_type(data_type: &str, max_length: i16, precision: u8, scale: u8) -> String {
    let lower = data_type.to_lowercase();
    match lower.as_str() {
        "varchar" | "char" | "varbinary" | "binary" => {
            if max_length == -1 {
                format!("{}(max)", data_type)
            } else {
                format!("{}({})", data_type, max_length)
            }
        }
        "nvarchar" | "nchar" => {
            if max_length == -1 {
                format!("{}(max)", data_type)
            } else {
                format!("{}({})", data_type, max_length / 2)
            }
        }
        "decimal" | "numeric" => format!("{}({},{})", data_type, precision, scale),
        "datetime2" | "time" | "datetimeoffset" => format!("{}({})", data_type, scale),
        _ => data_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mssql_type() {
        assert_eq!(format_mssql_type("nvarchar", 100, 0, 0), "nvarchar(50)");
        assert_eq!(format_mssql_type("nvarchar", -1, 0, 0), "nvarchar(max)");
        assert_eq!(format_mssql_type("varchar", 20, 0, 0), "varchar(20)");
        assert_eq!(format_mssql_type("decimal", 9, 10, 2), "decimal(10,2)");
        assert_eq!(format_mssql_type("datetime2", 8, 27, 7), "datetime2(7)");
        assert_eq!(format_mssql_type("int", 4, 10, 0), "int");
    }
}
