//! Configuration type definitions.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::error::{Result, TransferError};
use crate::loader::DEFAULT_BATCH_SIZE;
use crate::merge::MergeOptions;
use crate::orchestrator::{Operation, TransferSpec};
use crate::steps::{OnFail, SqlStep};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database connection.
    pub target: TargetConfig,

    /// Defaults shared by every table entry.
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Transfers to run, in order.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// Target database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Dialect id or alias: mssql, postgres, sqlite, mysql, redshift.
    pub r#type: String,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port. Defaults to the engine's standard port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Database file (sqlite only).
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Encrypt the connection (mssql only, default: false).
    #[serde(default)]
    pub encrypt: bool,

    /// Trust the server certificate (mssql only, default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Connection pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("path", &self.path)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl TargetConfig {
    /// Port to connect to, falling back to the engine default.
    pub fn port_or_default(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

/// Transfer defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Rows per INSERT statement before dialect limits (default: 5000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent INSERT statements per transfer (default: 1).
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,

    /// Cancel the run after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            parallel_workers: default_parallel_workers(),
            timeout_seconds: None,
        }
    }
}

/// Where a table's rows come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceConfig {
    /// Rows returned by a query against a SQLite database file.
    Sqlite { sqlite: PathBuf, query: String },
    /// A table or query on any supported engine.
    Database {
        connection: TargetConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        /// Inline SQL, or a path ending in `.sql`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
    },
    /// Headered CSV file.
    Csv { csv: PathBuf },
}

/// A pre- or post-transfer step as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlStepConfig {
    /// Inline SQL, or a path ending in `.sql`.
    Text(String),
    /// Exactly one of `sql`, `file` or `procedure`.
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        procedure: Option<String>,
        #[serde(default, skip_serializing_if = "Mapping::is_empty")]
        params: Mapping,
        #[serde(default)]
        on_fail: OnFail,
    },
}

impl SqlStepConfig {
    /// Build the step, reading `.sql` files relative to `base_dir`.
    pub fn resolve(&self, base_dir: &Path) -> Result<SqlStep> {
        match self {
            Self::Text(text) => Ok(SqlStep::statement(resolve_sql(text, base_dir)?)),
            Self::Detailed {
                sql,
                file,
                procedure,
                params,
                on_fail,
            } => {
                let step = match (sql, file, procedure) {
                    (Some(sql), None, None) => SqlStep::statement(sql.clone()),
                    (None, Some(file), None) => {
                        if !is_sql_file(file) {
                            return Err(TransferError::Config(format!(
                                "SQL file '{}' must end in .sql",
                                file.display()
                            )));
                        }
                        SqlStep::statement(read_sql_file(&base_dir.join(file))?)
                    }
                    (None, None, Some(name)) => SqlStep::procedure(name.clone(), params.clone()),
                    _ => {
                        return Err(TransferError::Config(
                            "a SQL step needs exactly one of sql, file or procedure".into(),
                        ))
                    }
                };
                Ok(step.with_on_fail(*on_fail))
            }
        }
    }
}

/// Inline SQL as is, or the contents of the `.sql` file it names relative to
/// `base_dir`.
pub fn resolve_sql(text: &str, base_dir: &Path) -> Result<String> {
    let trimmed = text.trim();
    let path = Path::new(trimmed);
    if trimmed.contains(char::is_whitespace) || !is_sql_file(path) {
        return Ok(text.to_string());
    }
    read_sql_file(&base_dir.join(path))
}

fn is_sql_file(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("sql"))
}

fn read_sql_file(path: &Path) -> Result<String> {
    let sql = std::fs::read_to_string(path)?;
    if sql.trim().is_empty() {
        return Err(TransferError::Config(format!(
            "SQL file '{}' is empty",
            path.display()
        )));
    }
    Ok(sql)
}

/// One table transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Target table name.
    pub table: String,

    /// Target schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// insert, refresh or merge (default: merge).
    #[serde(default)]
    pub operation: Operation,

    /// SQL shape override; defaults to `target.type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,

    /// Dataset source.
    pub source: SourceConfig,

    #[serde(flatten)]
    pub merge: MergeOptions,

    /// Per-table override of `transfer.batch_size`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Per-table override of `transfer.parallel_workers`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_workers: Option<usize>,

    /// Steps run inside the transaction before the transfer.
    #[serde(default)]
    pub pre_sql: Vec<SqlStepConfig>,

    /// Steps run inside the transaction before commit.
    #[serde(default)]
    pub post_sql: Vec<SqlStepConfig>,
}

impl TableConfig {
    /// `schema.table`, or just `table`.
    pub fn display_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }

    /// Build the transfer spec for this entry, applying `defaults` where the
    /// entry does not override them. SQL files resolve against `base_dir`.
    pub fn to_spec(&self, defaults: &TransferConfig, base_dir: &Path) -> Result<TransferSpec> {
        let steps = |configs: &[SqlStepConfig]| {
            configs
                .iter()
                .map(|c| c.resolve(base_dir))
                .collect::<Result<Vec<_>>>()
        };
        Ok(TransferSpec {
            table: self.table.clone(),
            schema: self.schema.clone(),
            operation: self.operation,
            dialect: self.dialect.clone(),
            merge: self.merge.clone(),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            parallel_workers: self.parallel_workers.unwrap_or(defaults.parallel_workers),
            pre_sql: steps(&self.pre_sql)?,
            post_sql: steps(&self.post_sql)?,
        })
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_parallel_workers() -> usize {
    1
}

fn default_max_connections() -> usize {
    4
}
