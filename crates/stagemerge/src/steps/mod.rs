//! Statements and stored procedure calls run inside a transfer's transaction,
//! before the data phases (`pre_sql`) or right before commit (`post_sql`).

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::core::{quote_ident, SqlNullType, SqlValue};
use crate::dialect::{CallStyle, DialectProfile};
use crate::error::{Result, TransferError};

/// Savepoint guarding a step that may fail without failing the transfer.
pub const STEP_SAVEPOINT: &str = "stagemerge_step";

/// What happens to the transfer when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFail {
    /// The transfer fails and rolls back.
    #[default]
    Fail,
    /// The step's effects are rolled back to a savepoint and the transfer goes on.
    Continue,
}

/// The statement a step runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlCommand {
    /// Literal SQL, run without parameters.
    Statement(String),
    /// Stored procedure with named parameters, in call order.
    Procedure {
        name: String,
        #[serde(default)]
        params: Mapping,
    },
}

/// One pre- or post-transfer step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStep {
    pub command: SqlCommand,
    #[serde(default)]
    pub on_fail: OnFail,
}

impl SqlStep {
    pub fn statement(sql: impl Into<String>) -> Self {
        Self {
            command: SqlCommand::Statement(sql.into()),
            on_fail: OnFail::Fail,
        }
    }

    pub fn procedure(name: impl Into<String>, params: Mapping) -> Self {
        Self {
            command: SqlCommand::Procedure {
                name: name.into(),
                params,
            },
            on_fail: OnFail::Fail,
        }
    }

    #[must_use]
    pub fn with_on_fail(mut self, on_fail: OnFail) -> Self {
        self.on_fail = on_fail;
        self
    }

    /// Render the step for `profile`: SQL text plus its bind parameters.
    ///
    /// # Errors
    ///
    /// `Config` for an unquotable procedure name, a parameter name that is
    /// not a plain identifier, or a parameter value that is not a scalar.
    pub fn render(&self, profile: &DialectProfile) -> Result<(String, Vec<SqlValue<'static>>)> {
        match &self.command {
            SqlCommand::Statement(sql) => {
                if sql.trim().is_empty() {
                    return Err(TransferError::Config("pre/post SQL statement is empty".into()));
                }
                Ok((sql.clone(), Vec::new()))
            }
            SqlCommand::Procedure { name, params } => render_procedure(profile, name, params),
        }
    }
}

impl From<&str> for SqlStep {
    fn from(sql: &str) -> Self {
        Self::statement(sql)
    }
}

impl From<String> for SqlStep {
    fn from(sql: String) -> Self {
        Self::statement(sql)
    }
}

fn render_procedure(
    profile: &DialectProfile,
    name: &str,
    params: &Mapping,
) -> Result<(String, Vec<SqlValue<'static>>)> {
    let quoted = name
        .split('.')
        .map(|part| quote_ident(part.trim(), profile.quote_style))
        .collect::<Result<Vec<_>>>()?
        .join(".");

    let mut values = Vec::with_capacity(params.len());
    let mut args = Vec::with_capacity(params.len());
    for (key, value) in params {
        let key = param_name(key)?;
        let value = param_value(key, value)?;
        let placeholder = profile.placeholder(values.len() + 1, &value);
        args.push(match profile.call_style {
            CallStyle::Exec => format!("@{} = {}", key, placeholder),
            CallStyle::Call => placeholder,
        });
        values.push(value);
    }

    let sql = match profile.call_style {
        CallStyle::Exec if args.is_empty() => format!("EXEC {}", quoted),
        CallStyle::Exec => format!("EXEC {} {}", quoted, args.join(", ")),
        CallStyle::Call => format!("CALL {}({})", quoted, args.join(", ")),
    };
    Ok((sql, values))
}

fn param_name(key: &Value) -> Result<&str> {
    let name = key.as_str().unwrap_or_default();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(TransferError::Config(format!(
            "procedure parameter name {:?} must be letters, digits and underscores",
            key
        )));
    }
    Ok(name)
}

fn param_value(name: &str, value: &Value) -> Result<SqlValue<'static>> {
    let value = match value {
        Value::Null => SqlValue::Null(SqlNullType::String),
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::I64(i),
            None => SqlValue::F64(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::text(s.clone()),
        _ => {
            return Err(TransferError::Config(format!(
                "procedure parameter '{}' must be a scalar value",
                name
            )))
        }
    };
    Ok(value)
}
