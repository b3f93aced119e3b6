//! Configuration validation.

use std::collections::HashSet;

use super::{Config, SourceConfig, SqlStepConfig, TargetConfig};
use crate::dialect::DialectId;
use crate::error::{Result, TransferError};
use crate::orchestrator::Operation;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("target", &config.target)?;

    // Transfer defaults
    if config.transfer.batch_size == 0 {
        return Err(TransferError::Config(
            "transfer.batch_size must be at least 1".into(),
        ));
    }
    if config.transfer.parallel_workers == 0 {
        return Err(TransferError::Config(
            "transfer.parallel_workers must be at least 1".into(),
        ));
    }
    if let Some(0) = config.transfer.timeout_seconds {
        return Err(TransferError::Config(
            "transfer.timeout_seconds must be at least 1".into(),
        ));
    }

    // Tables
    if config.tables.is_empty() {
        return Err(TransferError::Config(
            "at least one entry in tables is required".into(),
        ));
    }

    let mut seen = HashSet::new();
    for table in &config.tables {
        let name = table.display_name();
        if table.table.is_empty() {
            return Err(TransferError::Config("tables[].table is required".into()));
        }
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(TransferError::Config(format!(
                "table {} is listed more than once",
                name
            )));
        }
        if let Some(dialect) = &table.dialect {
            dialect.parse::<DialectId>()?;
        }
        if table.operation == Operation::Merge {
            table.merge.validate()?;
        }
        if let Some(0) = table.batch_size {
            return Err(TransferError::Config(format!(
                "{}: batch_size must be at least 1",
                name
            )));
        }
        if let Some(0) = table.parallel_workers {
            return Err(TransferError::Config(format!(
                "{}: parallel_workers must be at least 1",
                name
            )));
        }
        match &table.source {
            SourceConfig::Sqlite { query, .. } => {
                if query.trim().is_empty() {
                    return Err(TransferError::Config(format!(
                        "{}: source.query is required for a sqlite source",
                        name
                    )));
                }
            }
            SourceConfig::Database {
                connection,
                table: source_table,
                schema,
                query,
            } => {
                validate_connection(&format!("{}: source.connection", name), connection)?;
                match (source_table, query) {
                    (Some(t), None) if !t.trim().is_empty() => {}
                    (None, Some(q)) if !q.trim().is_empty() => {
                        if schema.is_some() {
                            return Err(TransferError::Config(format!(
                                "{}: source.schema only applies to source.table",
                                name
                            )));
                        }
                    }
                    _ => {
                        return Err(TransferError::Config(format!(
                            "{}: a database source needs exactly one of table or query",
                            name
                        )));
                    }
                }
            }
            SourceConfig::Csv { .. } => {}
        }
        for step in table.pre_sql.iter().chain(&table.post_sql) {
            validate_step(&name, step)?;
        }
    }

    Ok(())
}

/// Check a connection block; `what` prefixes error messages.
fn validate_connection(what: &str, conn: &TargetConfig) -> Result<()> {
    let dialect: DialectId = conn.r#type.parse()?;
    match dialect {
        DialectId::Sqlite => {
            if conn.path.is_none() {
                return Err(TransferError::Config(format!(
                    "{}.path is required for sqlite",
                    what
                )));
            }
        }
        DialectId::Ansi => {
            return Err(TransferError::Config(format!(
                "{}.type 'ansi' has no driver; use it as a per-table dialect override",
                what
            )));
        }
        _ => {
            for (field, value) in [
                ("host", &conn.host),
                ("database", &conn.database),
                ("user", &conn.user),
            ] {
                if value.is_empty() {
                    return Err(TransferError::Config(format!(
                        "{}.{} is required",
                        what, field
                    )));
                }
            }
        }
    }
    if conn.max_connections == 0 {
        return Err(TransferError::Config(format!(
            "{}.max_connections must be at least 1",
            what
        )));
    }
    Ok(())
}

fn validate_step(table: &str, step: &SqlStepConfig) -> Result<()> {
    match step {
        SqlStepConfig::Text(sql) if sql.trim().is_empty() => Err(TransferError::Config(format!(
            "{}: pre/post SQL statement is empty",
            table
        ))),
        SqlStepConfig::Text(_) => Ok(()),
        SqlStepConfig::Detailed {
            sql,
            file,
            procedure,
            params,
            ..
        } => {
            let given = [sql.is_some(), file.is_some(), procedure.is_some()]
                .iter()
                .filter(|set| **set)
                .count();
            if given != 1 {
                return Err(TransferError::Config(format!(
                    "{}: a SQL step needs exactly one of sql, file or procedure",
                    table
                )));
            }
            if procedure.is_none() && !params.is_empty() {
                return Err(TransferError::Config(format!(
                    "{}: params only apply to a procedure step",
                    table
                )));
            }
            Ok(())
        }
    }
}
