//! Transfer orchestrator - drives one dataset into one target table.
//!
//! A transfer runs as a single transaction through fixed phases:
//!
//! ```text
//! VALIDATE -> STAGE_CREATE -> LOAD -> RECONCILE -> CLEANUP -> COMMIT
//! ```
//!
//! `insert` and `refresh` skip staging and load straight into the target.
//! Any failure rolls the whole transaction back, so the target is either
//! fully updated or untouched.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::core::{
    validate_identifier, ColumnProfile, ConnectionProvider, Dataset, SchemaCatalog, TableRef,
    Transaction,
};
use crate::dialect::{DialectId, DialectProfile};
use crate::error::{Result, TransferError};
use crate::loader::{self, chunk_ranges, effective_chunk_size, LoadOptions, DEFAULT_BATCH_SIZE};
use crate::merge::{synthesize, MergeOptions, MergeStatement};
use crate::staging::{self, StagingTable};
use crate::steps::{OnFail, SqlStep, STEP_SAVEPOINT};

/// How the dataset is applied to the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Append rows.
    Insert,
    /// Delete every row, then insert.
    Refresh,
    /// Upsert through a staging table.
    #[default]
    Merge,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Refresh => "refresh",
            Operation::Merge => "merge",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing description of one transfer, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSpec {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub operation: Operation,
    /// Overrides the dialect reported by the connection provider.
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default)]
    pub merge: MergeOptions,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    /// Executed inside the transaction before any other statement.
    #[serde(default)]
    pub pre_sql: Vec<SqlStep>,
    /// Executed inside the transaction right before commit.
    #[serde(default)]
    pub post_sql: Vec<SqlStep>,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_parallel_workers() -> usize {
    1
}

impl TransferSpec {
    pub fn new(table: impl Into<String>, operation: Operation) -> Self {
        Self {
            table: table.into(),
            schema: None,
            operation,
            dialect: None,
            merge: MergeOptions::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            parallel_workers: 1,
            pre_sql: Vec::new(),
            post_sql: Vec::new(),
        }
    }
}

/// A validated, immutable transfer. Borrows the dataset for its lifetime.
#[derive(Clone)]
pub struct TransferRequest<'d> {
    spec: TransferSpec,
    target: TableRef,
    profile: &'static DialectProfile,
    dataset: &'d dyn Dataset,
}

impl std::fmt::Debug for TransferRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("spec", &self.spec)
            .field("target", &self.target)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl<'d> TransferRequest<'d> {
    /// Validate `spec` and bind `dataset` in one step.
    ///
    /// `default_dialect` applies unless the spec names its own.
    ///
    /// # Errors
    ///
    /// - `UnsupportedDialect` for an unknown dialect override
    /// - `InvalidMergeConfiguration` when a merge skips both inserts and updates
    /// - `Config` for bad identifiers or a zero batch size / worker count
    pub fn new(
        spec: TransferSpec,
        default_dialect: DialectId,
        dataset: &'d dyn Dataset,
    ) -> Result<Self> {
        let profile = match &spec.dialect {
            Some(id) => id.parse::<DialectId>()?.profile(),
            None => default_dialect.profile(),
        };

        let target = TableRef::new(spec.schema.as_deref(), &spec.table);
        target.validate()?;

        if spec.batch_size == 0 {
            return Err(TransferError::Config("batch_size must be at least 1".into()));
        }
        if spec.parallel_workers == 0 {
            return Err(TransferError::Config(
                "parallel_workers must be at least 1".into(),
            ));
        }

        if spec.operation == Operation::Merge {
            spec.merge.validate()?;
            for col in spec
                .merge
                .match_columns
                .iter()
                .chain(&spec.merge.constraint_columns)
            {
                validate_identifier(col)?;
            }
        }

        for col in dataset.columns() {
            validate_identifier(col)?;
        }

        for step in spec.pre_sql.iter().chain(&spec.post_sql) {
            step.render(profile)?;
            if step.on_fail == OnFail::Continue && !profile.supports_savepoints {
                return Err(TransferError::Config(format!(
                    "on_fail: continue needs savepoints, which {} does not support",
                    profile.id
                )));
            }
        }

        Ok(Self {
            spec,
            target,
            profile,
            dataset,
        })
    }

    pub fn target(&self) -> &TableRef {
        &self.target
    }

    pub fn operation(&self) -> Operation {
        self.spec.operation
    }

    pub fn dialect(&self) -> DialectId {
        self.profile.id
    }

    pub fn profile(&self) -> &'static DialectProfile {
        self.profile
    }

    pub fn spec(&self) -> &TransferSpec {
        &self.spec
    }

    pub fn dataset(&self) -> &'d dyn Dataset {
        self.dataset
    }
}

/// Result of a successful transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Target table, schema-qualified when a schema was given.
    pub table: String,

    pub operation: Operation,

    pub dialect: DialectId,

    /// Name of the staging table used by a merge.
    pub staging_table: Option<String>,

    /// Rows removed by a refresh.
    pub rows_deleted: u64,

    /// Rows written by the load phase (into staging for a merge).
    pub rows_loaded: u64,

    /// Rows affected by the reconcile statements, as reported by the driver.
    pub rows_reconciled: u64,

    /// Insert statements issued by the load phase.
    pub chunks: usize,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub duration_ms: u64,
}

impl TransferReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// The statements a transfer would run, without touching the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferPlan {
    pub table: String,
    pub operation: Operation,
    pub dialect: DialectId,
    pub rows: usize,
    pub chunks: usize,
    pub rows_per_chunk: usize,
    /// Statements in execution order. Row inserts appear once as a template.
    pub statements: Vec<String>,
}

/// Everything VALIDATE resolves before the transaction opens.
struct Resolved {
    staging_columns: Vec<ColumnProfile>,
    merge: Option<MergeStatement>,
}

/// Counters accumulated while the transaction is open.
#[derive(Default)]
struct Progress {
    /// Live staging table; cleared once dropped.
    staging: Option<StagingTable>,
    staging_name: Option<String>,
    rows_deleted: u64,
    rows_loaded: u64,
    rows_reconciled: u64,
    chunks: usize,
}

/// Runs transfers against one connection provider.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn ConnectionProvider>,
    catalog: Arc<dyn SchemaCatalog>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ConnectionProvider>, catalog: Arc<dyn SchemaCatalog>) -> Self {
        Self {
            provider,
            catalog,
            cancel: CancellationToken::new(),
        }
    }

    /// Observe `token`; once cancelled, running transfers roll back.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Dialect of the underlying connection provider.
    pub fn dialect(&self) -> DialectId {
        self.provider.dialect()
    }

    /// Build a request that defaults to this provider's dialect.
    pub fn request<'d>(
        &self,
        spec: TransferSpec,
        dataset: &'d dyn Dataset,
    ) -> Result<TransferRequest<'d>> {
        TransferRequest::new(spec, self.provider.dialect(), dataset)
    }

    /// Check connectivity.
    pub async fn health_check(&self) -> Result<()> {
        self.provider.ping().await
    }

    /// Run one transfer to completion.
    pub async fn run(&self, request: &TransferRequest<'_>) -> Result<TransferReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "transfer",
            run_id = %run_id,
            table = %request.target(),
            operation = %request.operation()
        );
        self.run_inner(request, run_id).instrument(span).await
    }

    async fn run_inner(&self, request: &TransferRequest<'_>, run_id: String) -> Result<TransferReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let dataset = request.dataset();

        info!(
            "Starting {} of {} rows into {} ({})",
            request.operation(),
            dataset.len(),
            request.target(),
            request.dialect()
        );

        // Phase 1: validate against the catalog before anything is written
        let resolved = self.validate(request).await?;

        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let mut tx = self.provider.begin().await?;
        let mut progress = Progress::default();

        let outcome = self
            .execute_phases(tx.as_ref(), request, &resolved, &mut progress)
            .await;

        let outcome = match outcome {
            Ok(()) if self.cancel.is_cancelled() => Err(TransferError::Cancelled),
            other => other,
        };

        match outcome {
            Ok(()) => {
                info!("Phase 6: Committing");
                if let Err(e) = tx.commit().await {
                    let err = TransferError::commit(request.target().to_string(), e);
                    self.abort(tx, request.profile(), progress.staging.as_ref()).await;
                    return Err(err);
                }
                if let Err(e) = tx.close().await {
                    warn!("Failed to release connection after commit: {}", e);
                }
            }
            Err(err) => {
                warn!("Transfer into {} failed: {}", request.target(), err);
                self.abort(tx, request.profile(), progress.staging.as_ref()).await;
                return Err(err);
            }
        }

        let report = TransferReport {
            run_id,
            table: request.target().to_string(),
            operation: request.operation(),
            dialect: request.dialect(),
            staging_table: progress.staging_name,
            rows_deleted: progress.rows_deleted,
            rows_loaded: progress.rows_loaded,
            rows_reconciled: progress.rows_reconciled,
            chunks: progress.chunks,
            started_at,
            completed_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Transfer complete: {} loaded, {} reconciled, {} deleted in {}ms",
            report.rows_loaded, report.rows_reconciled, report.rows_deleted, report.duration_ms
        );
        Ok(report)
    }

    /// Resolve staging columns and the merge statement from a catalog snapshot.
    async fn validate(&self, request: &TransferRequest<'_>) -> Result<Resolved> {
        info!("Phase 1: Validating against {}", request.target());
        let profiles = self.catalog.columns(request.target()).await?;
        if profiles.is_empty() {
            return Err(TransferError::Config(format!(
                "target table {} does not exist or has no columns",
                request.target()
            )));
        }

        let columns = request.dataset().columns();
        let staging_columns = staging::staging_columns(columns, &profiles)?;

        let merge = match request.operation() {
            Operation::Merge => Some(MergeStatement::new(
                request.target().clone(),
                columns,
                &profiles,
                &request.spec().merge,
            )?),
            Operation::Insert | Operation::Refresh => None,
        };

        Ok(Resolved {
            staging_columns,
            merge,
        })
    }

    /// Phases 2 through 5. Leaves the transaction open for commit or rollback.
    async fn execute_phases(
        &self,
        tx: &dyn Transaction,
        request: &TransferRequest<'_>,
        resolved: &Resolved,
        progress: &mut Progress,
    ) -> Result<()> {
        let profile = request.profile();
        let target = request.target();
        let table = target.to_string();

        for step in &request.spec().pre_sql {
            self.run_step(tx, profile, step)
                .await?
                .map_err(|e| TransferError::load(&table, format!("pre-SQL failed: {}", e)))?;
        }

        let load_options = LoadOptions {
            batch_size: request.spec().batch_size,
            parallel_workers: request.spec().parallel_workers,
            cancel: self.cancel.clone(),
        };

        match &resolved.merge {
            None => {
                if request.operation() == Operation::Refresh {
                    let sql = format!("DELETE FROM {}", target.quoted(profile.quote_style)?);
                    debug!("Refresh: {}", sql);
                    progress.rows_deleted = self
                        .cancellable(tx.execute(&sql, &[]))
                        .await?
                        .map_err(|e| TransferError::load(&table, e))?;
                    info!("Deleted {} existing rows from {}", progress.rows_deleted, table);
                }

                info!("Phase 3: Loading {} rows into {}", request.dataset().len(), table);
                let stats =
                    loader::load(tx, profile, target, request.dataset(), &load_options).await?;
                progress.rows_loaded = stats.rows_loaded;
                progress.chunks = stats.chunks;
            }
            Some(stmt) => {
                info!("Phase 2: Creating staging table");
                self.check_cancel()?;
                let staging =
                    staging::create_staging(tx, profile, &target.name, &resolved.staging_columns)
                        .await?;
                let staging_ref = staging.table_ref();
                progress.staging_name = Some(staging.name.clone());
                progress.staging = Some(staging);

                info!(
                    "Phase 3: Loading {} rows into {}",
                    request.dataset().len(),
                    staging_ref
                );
                let stats =
                    loader::load(tx, profile, &staging_ref, request.dataset(), &load_options)
                        .await?;
                progress.rows_loaded = stats.rows_loaded;
                progress.chunks = stats.chunks;

                info!("Phase 4: Reconciling {} from {}", table, staging_ref);
                self.check_cancel()?;
                for sql in synthesize(profile, stmt, &staging_ref)? {
                    debug!("Reconcile: {}", sql);
                    progress.rows_reconciled += self
                        .cancellable(tx.execute(&sql, &[]))
                        .await?
                        .map_err(|e| TransferError::reconcile(&table, e))?;
                }

                info!("Phase 5: Dropping staging table");
                if let Some(staging) = &progress.staging {
                    staging::drop_staging(tx, profile, staging).await?;
                }
                progress.staging = None;
            }
        }

        for step in &request.spec().post_sql {
            self.run_step(tx, profile, step)
                .await?
                .map_err(|e| TransferError::reconcile(&table, format!("post-SQL failed: {}", e)))?;
        }

        Ok(())
    }

    /// Run one pre- or post-SQL step. The outer error is `Cancelled`; the
    /// inner one is the step's failure, which `on_fail: continue` swallows
    /// after rolling back to the step's savepoint.
    async fn run_step(
        &self,
        tx: &dyn Transaction,
        profile: &DialectProfile,
        step: &SqlStep,
    ) -> Result<Result<()>> {
        let (sql, params) = match step.render(profile) {
            Ok(rendered) => rendered,
            Err(e) => return Ok(Err(e)),
        };
        debug!("Step: {}", sql);

        if step.on_fail == OnFail::Fail {
            return Ok(self.cancellable(tx.execute(&sql, &params)).await?.map(|_| ()));
        }

        if let Err(e) = self
            .cancellable(tx.execute(&profile.savepoint(STEP_SAVEPOINT), &[]))
            .await?
        {
            return Ok(Err(e));
        }
        match self.cancellable(tx.execute(&sql, &params)).await? {
            Ok(_) => Ok(Ok(())),
            Err(e) => {
                warn!("Step failed, continuing: {}: {}", sql, e);
                Ok(tx
                    .execute(&profile.rollback_to_savepoint(STEP_SAVEPOINT), &[])
                    .await
                    .map(|_| ()))
            }
        }
    }

    /// Roll back, drop any staging table left behind, release the connection.
    /// Failures here are logged; the caller reports the original error.
    async fn abort(
        &self,
        mut tx: Box<dyn Transaction>,
        profile: &DialectProfile,
        staging: Option<&StagingTable>,
    ) {
        if let Err(e) = tx.rollback().await {
            warn!("Rollback failed: {}", e);
        }
        if let Some(staging) = staging {
            if let Err(e) = staging::drop_staging(tx.as_ref(), profile, staging).await {
                warn!("Could not drop staging table {}: {}", staging.name, e);
            }
        }
        if let Err(e) = tx.close().await {
            warn!("Failed to release connection: {}", e);
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Race `fut` against cancellation. The outer error is `Cancelled`.
    async fn cancellable<F, T>(&self, fut: F) -> Result<Result<T>>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            res = fut => Ok(res),
        }
    }

    /// Describe what [`Orchestrator::run`] would execute for `request`.
    pub async fn plan(&self, request: &TransferRequest<'_>) -> Result<TransferPlan> {
        let resolved = self.validate(request).await?;
        let profile = request.profile();
        let target = request.target();
        let dataset = request.dataset();
        let spec = request.spec();

        let rows_per_chunk =
            effective_chunk_size(profile, spec.batch_size, dataset.columns().len());
        let chunks = chunk_ranges(dataset.len(), rows_per_chunk).len();

        let mut statements = spec
            .pre_sql
            .iter()
            .map(|step| step.render(profile).map(|(sql, _)| sql))
            .collect::<Result<Vec<String>>>()?;
        let insert_template = |table: &TableRef| -> Result<String> {
            let sample = dataset.rows(0..dataset.len().min(1));
            let (sql, _) = loader::build_insert(profile, table, dataset.columns(), sample)?;
            Ok(sql)
        };

        match &resolved.merge {
            None => {
                if request.operation() == Operation::Refresh {
                    statements.push(format!("DELETE FROM {}", target.quoted(profile.quote_style)?));
                }
                if !dataset.is_empty() {
                    statements.push(insert_template(target)?);
                }
            }
            Some(stmt) => {
                let name = staging::allocate_name(&target.name, profile);
                let staging_ref = TableRef::new(None, &name);
                statements.push(staging::staging_ddl(
                    profile,
                    &name,
                    &resolved.staging_columns,
                )?);
                if !dataset.is_empty() {
                    statements.push(insert_template(&staging_ref)?);
                }
                statements.extend(synthesize(profile, stmt, &staging_ref)?);
                statements.push(format!(
                    "{} {}",
                    profile.drop_temp_table,
                    staging_ref.quoted(profile.quote_style)?
                ));
            }
        }

        for step in &spec.post_sql {
            statements.push(step.render(profile)?.0);
        }

        Ok(TransferPlan {
            table: target.to_string(),
            operation: request.operation(),
            dialect: request.dialect(),
            rows: dataset.len(),
            chunks,
            rows_per_chunk,
            statements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RecordBatch, SqlValue};

    fn dataset() -> RecordBatch {
        RecordBatch::from_rows(
            &["ItemID", "ItemName"],
            vec![vec![SqlValue::I32(1), SqlValue::text("Laptop")]],
        )
        .unwrap()
    }

    #[test]
    fn test_operation_serde_lowercase() {
        let op: Operation = serde_yaml::from_str("refresh").unwrap();
        assert_eq!(op, Operation::Refresh);
        assert_eq!(serde_json::to_string(&Operation::Merge).unwrap(), "\"merge\"");
    }

    #[test]
    fn test_request_uses_default_dialect() {
        let data = dataset();
        let request =
            TransferRequest::new(TransferSpec::new("human", Operation::Merge), DialectId::Sqlite, &data)
                .unwrap();
        assert_eq!(request.dialect(), DialectId::Sqlite);
        assert_eq!(request.target().to_string(), "human");
    }

    #[test]
    fn test_request_dialect_override() {
        let data = dataset();
        let mut spec = TransferSpec::new("human", Operation::Merge);
        spec.dialect = Some("postgresql".into());
        let request = TransferRequest::new(spec, DialectId::Sqlite, &data).unwrap();
        assert_eq!(request.dialect(), DialectId::Postgres);
    }

    #[test]
    fn test_request_unknown_dialect() {
        let data = dataset();
        let mut spec = TransferSpec::new("human", Operation::Insert);
        spec.dialect = Some("oracle".into());
        let err = TransferRequest::new(spec, DialectId::Sqlite, &data).unwrap_err();
        assert!(matches!(err, TransferError::UnsupportedDialect { .. }));
    }

    #[test]
    fn test_request_rejects_both_skips_only_for_merge() {
        let data = dataset();
        let mut spec = TransferSpec::new("human", Operation::Merge);
        spec.merge.skip_inserts = true;
        spec.merge.skip_updates = true;
        assert!(matches!(
            TransferRequest::new(spec.clone(), DialectId::Sqlite, &data),
            Err(TransferError::InvalidMergeConfiguration(_))
        ));

        spec.operation = Operation::Insert;
        assert!(TransferRequest::new(spec, DialectId::Sqlite, &data).is_ok());
    }

    #[test]
    fn test_request_rejects_zero_batch_and_bad_table() {
        let data = dataset();
        let mut spec = TransferSpec::new("human", Operation::Insert);
        spec.batch_size = 0;
        assert!(TransferRequest::new(spec, DialectId::Sqlite, &data).is_err());

        let spec = TransferSpec::new("", Operation::Insert);
        assert!(TransferRequest::new(spec, DialectId::Sqlite, &data).is_err());
    }

    #[test]
    fn test_spec_yaml_defaults() {
        let spec: TransferSpec = serde_yaml::from_str("table: human\n").unwrap();
        assert_eq!(spec.operation, Operation::Merge);
        assert_eq!(spec.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(spec.parallel_workers, 1);
        assert!(spec.merge.skip_deletes);
    }
}
