//! # stagemerge
//!
//! Transactional transfer of tabular datasets into relational tables.
//!
//! A transfer writes one in-memory dataset into one target table in a single
//! transaction, using one of three operations:
//!
//! - **insert** appends rows
//! - **refresh** deletes every row, then inserts
//! - **merge** loads a session-scoped staging table and reconciles it into
//!   the target with dialect-appropriate upsert SQL
//!
//! Batched, parameterized loading respects each dialect's bind parameter
//! limits. Any failure rolls the whole transfer back.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stagemerge::{drivers, Operation, Orchestrator, RecordBatch, TransferSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let target = drivers::connect_sqlite("warehouse.db".as_ref()).await?;
//!     let orchestrator = Orchestrator::new(target.provider, target.catalog);
//!
//!     let dataset = RecordBatch::from_csv_path("human.csv")?;
//!     let request = orchestrator.request(TransferSpec::new("human", Operation::Merge), &dataset)?;
//!     let report = orchestrator.run(&request).await?;
//!     println!("Reconciled {} rows", report.rows_reconciled);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod loader;
pub mod merge;
pub mod orchestrator;
pub mod staging;
pub mod steps;

// Re-exports for convenient access
pub use config::{
    Config, SourceConfig, SqlStepConfig, TableConfig, TargetConfig, TransferConfig,
};
pub use crate::core::{
    ColumnProfile, ConnectionProvider, Dataset, DatasetSource, RecordBatch, Row, SchemaCatalog,
    SqlNullType, SqlValue, TableRef, Transaction,
};
pub use dialect::{profile_for, DialectId, DialectProfile, UpsertFamily};
pub use error::{Result, TransferError};
pub use merge::MergeOptions;
pub use orchestrator::{
    Operation, Orchestrator, TransferPlan, TransferReport, TransferRequest, TransferSpec,
};
pub use steps::{OnFail, SqlCommand, SqlStep};
