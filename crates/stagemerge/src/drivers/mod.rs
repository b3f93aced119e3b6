//! Database driver implementations.
//!
//! Each driver implements [`ConnectionProvider`], [`SchemaCatalog`] and
//! [`DatasetSource`] for one engine, so any of them can be a target or a
//! source:
//!
//! - [`mssql`]: SQL Server via Tiberius and bb8
//! - [`postgres`]: PostgreSQL (and Redshift) via tokio-postgres and deadpool
//! - [`mysql`]: MySQL / MariaDB via mysql_async
//! - [`sqlite`]: SQLite via sqlx
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/` with a target type and a session type
//! 2. Implement `ConnectionProvider`, `SchemaCatalog`, `DatasetSource` and `Transaction`
//! 3. Add a `DialectProfile` for its SQL shape and a branch in [`connect`]

pub mod mssql;
pub mod mysql;
pub mod postgres;
mod serial;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

pub use mssql::MssqlTarget;
pub use mysql::MysqlTarget;
pub use postgres::PostgresTarget;
pub use sqlite::SqliteTarget;

use crate::config::TargetConfig;
use crate::core::{
    qualify, ConnectionProvider, DatasetSource, RecordBatch, SchemaCatalog, TableRef,
};
use crate::dialect::DialectId;
use crate::error::{Result, TransferError};

/// A connected database: transaction source, catalog and query reader,
/// usually the same object.
#[derive(Clone)]
pub struct Target {
    pub provider: Arc<dyn ConnectionProvider>,
    pub catalog: Arc<dyn SchemaCatalog>,
    pub source: Arc<dyn DatasetSource>,
}

impl Target {
    fn from_driver<T>(driver: T) -> Self
    where
        T: ConnectionProvider + SchemaCatalog + DatasetSource + 'static,
    {
        let driver = Arc::new(driver);
        Self {
            provider: driver.clone(),
            catalog: driver.clone(),
            source: driver,
        }
    }

    pub fn dialect(&self) -> DialectId {
        self.provider.dialect()
    }

    /// Every row of `table`, with its identifiers validated and quoted.
    pub async fn read_table(&self, table: &TableRef) -> Result<RecordBatch> {
        let profile = self.dialect().profile();
        let sql = format!(
            "SELECT * FROM {}",
            qualify(table.schema.as_deref(), &table.name, profile.quote_style)?
        );
        self.source.read_query(&sql).await
    }

    /// Rows returned by `sql`.
    pub async fn read_query(&self, sql: &str) -> Result<RecordBatch> {
        self.source.read_query(sql).await
    }
}

/// Connect to the configured target.
pub async fn connect(config: &TargetConfig) -> Result<Target> {
    let dialect: DialectId = config.r#type.parse()?;
    match dialect {
        DialectId::Mssql => Ok(Target::from_driver(MssqlTarget::connect(config).await?)),
        DialectId::Postgres | DialectId::Redshift => Ok(Target::from_driver(
            PostgresTarget::connect(config, dialect).await?,
        )),
        DialectId::Mysql => Ok(Target::from_driver(MysqlTarget::connect(config).await?)),
        DialectId::Sqlite => {
            let path = config.path.as_deref().ok_or_else(|| {
                TransferError::Config("target.path is required for sqlite".into())
            })?;
            Ok(Target::from_driver(
                SqliteTarget::connect(path, config.max_connections as u32).await?,
            ))
        }
        DialectId::Ansi => Err(TransferError::Config(
            "dialect 'ansi' has no driver".into(),
        )),
    }
}

/// Open a SQLite file as a target without a full [`TargetConfig`].
pub async fn connect_sqlite(path: &Path) -> Result<Target> {
    Ok(Target::from_driver(SqliteTarget::connect(path, 4).await?))
}
