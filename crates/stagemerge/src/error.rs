//! Error types for staging transfers.

use std::fmt;

use thiserror::Error;

/// Process exit code for configuration problems.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Process exit code for connection and pool failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Process exit code for a transfer that failed in one of its phases.
pub const EXIT_TRANSFER_ERROR: u8 = 3;
/// Process exit code for a cancelled transfer.
pub const EXIT_CANCELLED: u8 = 4;
/// Process exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Step of the transfer state machine an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Validate,
    StageCreate,
    Load,
    Reconcile,
    Cleanup,
    Commit,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validate => "VALIDATE",
            Phase::StageCreate => "STAGE_CREATE",
            Phase::Load => "LOAD",
            Phase::Reconcile => "RECONCILE",
            Phase::Cleanup => "CLEANUP",
            Phase::Commit => "COMMIT",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chunk INSERT that failed during the load phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// Zero-based chunk index in dispatch order.
    pub chunk_index: usize,
    /// Offset of the chunk's first row in the dataset.
    pub first_row: usize,
    /// Number of rows in the chunk.
    pub rows: usize,
    /// Database error text.
    pub message: String,
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {} (rows {}..{}): {}",
            self.chunk_index,
            self.first_row,
            self.first_row + self.rows,
            self.message
        )
    }
}

fn summarize_failures(failures: &[ChunkFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("\n  - {}", f))
        .collect::<Vec<_>>()
        .join("")
}

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The dialect identifier is not in the registry.
    #[error("Unsupported dialect '{dialect}' (supported: {supported})")]
    UnsupportedDialect { dialect: String, supported: String },

    /// Configuration error (invalid YAML, missing fields, unresolvable columns, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Merge options that would make the reconcile statement a no-op.
    #[error("Invalid merge configuration: {0}")]
    InvalidMergeConfiguration(String),

    /// Staging table DDL failed.
    #[error("[STAGE_CREATE] Failed to create staging table {table}: {message}")]
    StagingCreate { table: String, message: String },

    /// One or more chunk INSERTs failed.
    #[error("[LOAD] Batch load into {table} failed ({} chunk error(s)):{}", failures.len(), summarize_failures(failures))]
    BatchLoad {
        table: String,
        failures: Vec<ChunkFailure>,
    },

    /// A statement of the load phase other than a chunk INSERT failed (refresh delete, pre-SQL).
    #[error("[LOAD] {table}: {message}")]
    Load { table: String, message: String },

    /// The merge/upsert statement (or post-SQL) failed.
    #[error("[RECONCILE] Reconcile into {table} failed: {message}")]
    Reconcile { table: String, message: String },

    /// Dropping the staging table failed.
    #[error("[CLEANUP] Failed to drop staging table {table}: {message}")]
    Cleanup { table: String, message: String },

    /// Commit was rejected by the database.
    #[error("[COMMIT] Commit failed for {table}: {message}")]
    Commit { table: String, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// SQLite driver error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV parse error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Transfer was cancelled (SIGINT, timeout, etc.)
    #[error("Transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        TransferError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    pub fn staging_create(table: impl Into<String>, message: impl ToString) -> Self {
        TransferError::StagingCreate {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn load(table: impl Into<String>, message: impl ToString) -> Self {
        TransferError::Load {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn reconcile(table: impl Into<String>, message: impl ToString) -> Self {
        TransferError::Reconcile {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn cleanup(table: impl Into<String>, message: impl ToString) -> Self {
        TransferError::Cleanup {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn commit(table: impl Into<String>, message: impl ToString) -> Self {
        TransferError::Commit {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// The state machine phase this error terminated, if it came from one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            TransferError::UnsupportedDialect { .. }
            | TransferError::Config(_)
            | TransferError::InvalidMergeConfiguration(_) => Some(Phase::Validate),
            TransferError::StagingCreate { .. } => Some(Phase::StageCreate),
            TransferError::BatchLoad { .. } | TransferError::Load { .. } => Some(Phase::Load),
            TransferError::Reconcile { .. } => Some(Phase::Reconcile),
            TransferError::Cleanup { .. } => Some(Phase::Cleanup),
            TransferError::Commit { .. } => Some(Phase::Commit),
            _ => None,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            TransferError::UnsupportedDialect { .. }
            | TransferError::Config(_)
            | TransferError::InvalidMergeConfiguration(_)
            | TransferError::Yaml(_)
            | TransferError::Json(_)
            | TransferError::Csv(_) => EXIT_CONFIG_ERROR,
            TransferError::Pool { .. }
            | TransferError::Mssql(_)
            | TransferError::Postgres(_)
            | TransferError::Mysql(_)
            | TransferError::Sqlite(_) => EXIT_CONNECTION_ERROR,
            TransferError::StagingCreate { .. }
            | TransferError::BatchLoad { .. }
            | TransferError::Load { .. }
            | TransferError::Reconcile { .. }
            | TransferError::Cleanup { .. }
            | TransferError::Commit { .. } => EXIT_TRANSFER_ERROR,
            TransferError::Cancelled => EXIT_CANCELLED,
            TransferError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_attribution() {
        assert_eq!(
            TransferError::staging_create("t", "boom").phase(),
            Some(Phase::StageCreate)
        );
        assert_eq!(TransferError::reconcile("t", "x").phase(), Some(Phase::Reconcile));
        assert_eq!(TransferError::cleanup("t", "x").phase(), Some(Phase::Cleanup));
        assert_eq!(TransferError::Cancelled.phase(), None);
    }

    #[test]
    fn test_batch_load_message_lists_every_chunk() {
        let err = TransferError::BatchLoad {
            table: "_staging_human_abc123".into(),
            failures: vec![
                ChunkFailure {
                    chunk_index: 0,
                    first_row: 0,
                    rows: 10,
                    message: "constraint violated".into(),
                },
                ChunkFailure {
                    chunk_index: 3,
                    first_row: 30,
                    rows: 5,
                    message: "value too long".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("[LOAD]"));
        assert!(text.contains("2 chunk error(s)"));
        assert!(text.contains("chunk 3 (rows 30..35): value too long"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TransferError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(TransferError::pool("x", "y").exit_code(), EXIT_CONNECTION_ERROR);
        assert_eq!(TransferError::commit("t", "x").exit_code(), EXIT_TRANSFER_ERROR);
        assert_eq!(TransferError::Cancelled.exit_code(), EXIT_CANCELLED);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(TransferError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_phase_display_names() {
        assert_eq!(Phase::StageCreate.to_string(), "STAGE_CREATE");
        assert_eq!(Phase::Reconcile.to_string(), "RECONCILE");
    }
}
