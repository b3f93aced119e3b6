//! Dialect profile registry.
//!
//! Every SQL shape difference between engines that the engine cares about is
//! captured in one static [`DialectProfile`] per [`DialectId`]. Code that
//! generates SQL branches on profile fields (mostly [`UpsertFamily`]) and
//! never on dialect name strings.
//!
//! ```
//! use stagemerge::dialect::{profile_for, UpsertFamily};
//!
//! let profile = profile_for("SqlServer").unwrap();
//! assert_eq!(profile.upsert_family, UpsertFamily::NativeMerge);
//! assert_eq!(profile.temp_table_prefix, "##");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{QuoteStyle, SqlNullType, SqlValue};
use crate::error::{Result, TransferError};

/// Closed set of supported dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectId {
    Mssql,
    Postgres,
    Sqlite,
    Mysql,
    Redshift,
    Ansi,
}

/// How staging data is reconciled into the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertFamily {
    /// A single `MERGE` statement.
    NativeMerge,
    /// `INSERT .. SELECT .. ON CONFLICT (..) DO UPDATE`.
    InsertOnConflict,
    /// `UPDATE` from a join followed by an anti-join `INSERT`.
    GenericUpdateInsert,
}

/// Positional placeholder syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `@P1`, `@P2`, ...
    AtP,
    /// `$1`, `$2`, ... with an explicit cast per placeholder.
    DollarCast,
    /// `?`
    Question,
}

/// Shape of an UPDATE that reads from another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateJoinStyle {
    /// `UPDATE t AS tgt SET c = src.c FROM s AS src WHERE ..`
    FromClause,
    /// `UPDATE t AS tgt JOIN s AS src ON .. SET tgt.c = src.c`
    JoinClause,
}

/// How a stored procedure is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// `EXEC proc @name = @P1, ...`
    Exec,
    /// `CALL proc(?, ...)`
    Call,
}

/// Syntax rules of one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectProfile {
    pub id: DialectId,
    /// Prepended to staging table names (`##` makes a SQL Server global temp table).
    pub temp_table_prefix: &'static str,
    /// DDL verb for the staging table.
    pub create_temp_table: &'static str,
    pub upsert_family: UpsertFamily,
    pub quote_style: QuoteStyle,
    pub param_style: ParamStyle,
    /// Maximum bind parameters in one statement.
    pub max_params: usize,
    /// Maximum rows in one `VALUES` list, if the engine imposes one.
    pub max_rows_per_insert: Option<usize>,
    /// Drop statement for the staging table; MySQL needs `TEMPORARY` to avoid an implicit commit.
    pub drop_temp_table: &'static str,
    pub update_join_style: UpdateJoinStyle,
    /// `INSERT .. SELECT .. ON CONFLICT` needs a `WHERE true` to parse.
    pub on_conflict_needs_where: bool,
    pub call_style: CallStyle,
    /// Savepoints inside a transaction. Without them a failed statement
    /// aborts the whole transaction.
    pub supports_savepoints: bool,
    /// Statement that creates a savepoint named `{}`.
    pub savepoint_sql: &'static str,
    /// Statement that rolls back to savepoint `{}`.
    pub rollback_to_savepoint_sql: &'static str,
}

static MSSQL: DialectProfile = DialectProfile {
    id: DialectId::Mssql,
    temp_table_prefix: "##",
    create_temp_table: "CREATE TABLE",
    upsert_family: UpsertFamily::NativeMerge,
    quote_style: QuoteStyle::Bracket,
    param_style: ParamStyle::AtP,
    // 2100 minus headroom for the driver's own parameters
    max_params: 2098,
    max_rows_per_insert: Some(1000),
    drop_temp_table: "DROP TABLE IF EXISTS",
    update_join_style: UpdateJoinStyle::FromClause,
    on_conflict_needs_where: false,
    call_style: CallStyle::Exec,
    supports_savepoints: true,
    savepoint_sql: "SAVE TRANSACTION {}",
    rollback_to_savepoint_sql: "ROLLBACK TRANSACTION {}",
};

static POSTGRES: DialectProfile = DialectProfile {
    id: DialectId::Postgres,
    temp_table_prefix: "",
    create_temp_table: "CREATE TEMP TABLE",
    upsert_family: UpsertFamily::InsertOnConflict,
    quote_style: QuoteStyle::DoubleQuote,
    param_style: ParamStyle::DollarCast,
    max_params: 65535,
    max_rows_per_insert: None,
    drop_temp_table: "DROP TABLE IF EXISTS",
    update_join_style: UpdateJoinStyle::FromClause,
    on_conflict_needs_where: false,
    call_style: CallStyle::Call,
    supports_savepoints: true,
    savepoint_sql: "SAVEPOINT {}",
    rollback_to_savepoint_sql: "ROLLBACK TO SAVEPOINT {}",
};

static SQLITE: DialectProfile = DialectProfile {
    id: DialectId::Sqlite,
    temp_table_prefix: "",
    create_temp_table: "CREATE TEMP TABLE",
    upsert_family: UpsertFamily::InsertOnConflict,
    quote_style: QuoteStyle::DoubleQuote,
    param_style: ParamStyle::Question,
    max_params: 32766,
    max_rows_per_insert: None,
    drop_temp_table: "DROP TABLE IF EXISTS",
    update_join_style: UpdateJoinStyle::FromClause,
    on_conflict_needs_where: true,
    call_style: CallStyle::Call,
    supports_savepoints: true,
    savepoint_sql: "SAVEPOINT {}",
    rollback_to_savepoint_sql: "ROLLBACK TO SAVEPOINT {}",
};

static MYSQL: DialectProfile = DialectProfile {
    id: DialectId::Mysql,
    temp_table_prefix: "",
    create_temp_table: "CREATE TEMPORARY TABLE",
    upsert_family: UpsertFamily::GenericUpdateInsert,
    quote_style: QuoteStyle::Backtick,
    param_style: ParamStyle::Question,
    max_params: 65535,
    max_rows_per_insert: None,
    drop_temp_table: "DROP TEMPORARY TABLE IF EXISTS",
    update_join_style: UpdateJoinStyle::JoinClause,
    on_conflict_needs_where: false,
    call_style: CallStyle::Call,
    supports_savepoints: true,
    savepoint_sql: "SAVEPOINT {}",
    rollback_to_savepoint_sql: "ROLLBACK TO SAVEPOINT {}",
};

static REDSHIFT: DialectProfile = DialectProfile {
    id: DialectId::Redshift,
    temp_table_prefix: "",
    create_temp_table: "CREATE TEMP TABLE",
    upsert_family: UpsertFamily::GenericUpdateInsert,
    quote_style: QuoteStyle::DoubleQuote,
    param_style: ParamStyle::DollarCast,
    max_params: 32767,
    max_rows_per_insert: None,
    drop_temp_table: "DROP TABLE IF EXISTS",
    update_join_style: UpdateJoinStyle::FromClause,
    on_conflict_needs_where: false,
    call_style: CallStyle::Call,
    supports_savepoints: false,
    savepoint_sql: "SAVEPOINT {}",
    rollback_to_savepoint_sql: "ROLLBACK TO SAVEPOINT {}",
};

static ANSI: DialectProfile = DialectProfile {
    id: DialectId::Ansi,
    temp_table_prefix: "",
    create_temp_table: "CREATE TEMPORARY TABLE",
    upsert_family: UpsertFamily::GenericUpdateInsert,
    quote_style: QuoteStyle::DoubleQuote,
    param_style: ParamStyle::Question,
    max_params: 999,
    max_rows_per_insert: None,
    drop_temp_table: "DROP TABLE IF EXISTS",
    update_join_style: UpdateJoinStyle::FromClause,
    on_conflict_needs_where: false,
    call_style: CallStyle::Call,
    supports_savepoints: true,
    savepoint_sql: "SAVEPOINT {}",
    rollback_to_savepoint_sql: "ROLLBACK TO SAVEPOINT {}",
};

/// Canonical ids, in the order they are reported to users.
pub const SUPPORTED_DIALECTS: &[&str] = &["mssql", "postgres", "sqlite", "mysql", "redshift", "ansi"];

impl DialectId {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialectId::Mssql => "mssql",
            DialectId::Postgres => "postgres",
            DialectId::Sqlite => "sqlite",
            DialectId::Mysql => "mysql",
            DialectId::Redshift => "redshift",
            DialectId::Ansi => "ansi",
        }
    }

    pub fn profile(self) -> &'static DialectProfile {
        match self {
            DialectId::Mssql => &MSSQL,
            DialectId::Postgres => &POSTGRES,
            DialectId::Sqlite => &SQLITE,
            DialectId::Mysql => &MYSQL,
            DialectId::Redshift => &REDSHIFT,
            DialectId::Ansi => &ANSI,
        }
    }
}

impl FromStr for DialectId {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" | "tsql" => Ok(DialectId::Mssql),
            "postgres" | "postgresql" | "pg" => Ok(DialectId::Postgres),
            "sqlite" | "sqlite3" => Ok(DialectId::Sqlite),
            "mysql" | "mariadb" => Ok(DialectId::Mysql),
            "redshift" => Ok(DialectId::Redshift),
            "ansi" | "generic" => Ok(DialectId::Ansi),
            _ => Err(TransferError::UnsupportedDialect {
                dialect: s.to_string(),
                supported: SUPPORTED_DIALECTS.join(", "),
            }),
        }
    }
}

impl fmt::Display for DialectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look up the profile for a dialect identifier or alias.
///
/// # Errors
///
/// `UnsupportedDialect` if the identifier is unknown.
pub fn profile_for(dialect_id: &str) -> Result<&'static DialectProfile> {
    Ok(dialect_id.parse::<DialectId>()?.profile())
}

impl DialectProfile {
    /// Placeholder for the `index`-th (1-based) parameter bound to `value`.
    pub fn placeholder(&self, index: usize, value: &SqlValue<'_>) -> String {
        match self.param_style {
            ParamStyle::AtP => format!("@P{}", index),
            ParamStyle::Question => "?".to_string(),
            ParamStyle::DollarCast => format!("${}::{}", index, pg_cast(value.kind())),
        }
    }

    pub fn savepoint(&self, name: &str) -> String {
        self.savepoint_sql.replace("{}", name)
    }

    pub fn rollback_to_savepoint(&self, name: &str) -> String {
        self.rollback_to_savepoint_sql.replace("{}", name)
    }
}

/// Cast for a PostgreSQL placeholder so the parameter type follows the bound
/// value and the server applies the assignment cast to the column type.
fn pg_cast(kind: SqlNullType) -> &'static str {
    match kind {
        SqlNullType::Bool => "boolean",
        SqlNullType::I16 => "smallint",
        SqlNullType::I32 => "integer",
        SqlNullType::I64 => "bigint",
        SqlNullType::F32 => "real",
        SqlNullType::F64 => "double precision",
        SqlNullType::String => "text",
        SqlNullType::Bytes => "bytea",
        SqlNullType::Uuid => "uuid",
        SqlNullType::Decimal => "numeric",
        SqlNullType::DateTime => "timestamp",
        SqlNullType::DateTimeOffset => "timestamptz",
        SqlNullType::Date => "date",
        SqlNullType::Time => "time",
    }
}
