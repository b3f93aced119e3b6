//! Staging table lifecycle.
//!
//! A staging table lives for exactly one transfer: it is created inside the
//! transfer's transaction right before the load, receives the dataset, feeds
//! the reconcile statement and is dropped during cleanup. Names carry a random
//! suffix so concurrent transfers into the same target never share one.

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::core::{find_column, quote_ident, ColumnProfile, TableRef, Transaction};
use crate::dialect::DialectProfile;
use crate::error::{Result, TransferError};

/// Creation attempts before giving up (one retry with a fresh name).
pub const STAGING_CREATE_ATTEMPTS: usize = 2;

const SUFFIX_LEN: usize = 6;

/// Longest staging name we generate (PostgreSQL's identifier limit).
const MAX_STAGING_NAME_LEN: usize = 63;

/// A created staging table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingTable {
    /// Generated name, including the dialect prefix.
    pub name: String,
    /// Staging columns, in dataset order.
    pub columns: Vec<String>,
}

impl StagingTable {
    /// Staging tables are session scoped and never schema qualified.
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(None, &self.name)
    }
}

/// Generate a staging name for `base_table`: `<prefix>_staging_<base>_<suffix>`.
///
/// The suffix is 6 random lowercase alphanumerics, so collisions between
/// concurrent transfers are unlikely but possible; `create_staging` retries
/// with a fresh name when the DDL fails.
pub fn allocate_name(base_table: &str, profile: &DialectProfile) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();

    let fixed = profile.temp_table_prefix.len() + "_staging_".len() + 1 + SUFFIX_LEN;
    let budget = MAX_STAGING_NAME_LEN.saturating_sub(fixed);
    let mut end = base_table.len().min(budget);
    while !base_table.is_char_boundary(end) {
        end -= 1;
    }

    format!(
        "{}_staging_{}_{}",
        profile.temp_table_prefix,
        &base_table[..end],
        suffix
    )
}

/// Resolve the staging column definitions: one per dataset column, typed
/// from the target's catalog entry of the same name.
///
/// # Errors
///
/// `Config` if a dataset column does not exist in the target.
pub fn staging_columns(
    dataset_columns: &[String],
    profiles: &[ColumnProfile],
) -> Result<Vec<ColumnProfile>> {
    dataset_columns
        .iter()
        .map(|name| {
            let profile = find_column(profiles, name).ok_or_else(|| {
                TransferError::Config(format!(
                    "dataset column '{}' does not exist in the target table",
                    name
                ))
            })?;
            // keep the dataset's spelling so generated column lists line up
            Ok(ColumnProfile {
                name: name.clone(),
                data_type: profile.data_type.clone(),
                is_nullable: true,
                pk_ordinal: None,
                is_autoincrement: false,
            })
        })
        .collect()
}

/// Render the `CREATE` statement for a staging table.
///
/// Every column is nullable and no key, identity or default is carried over:
/// staging holds raw dataset rows, duplicates included.
pub fn staging_ddl(
    profile: &DialectProfile,
    staging_name: &str,
    columns: &[ColumnProfile],
) -> Result<String> {
    let mut defs = Vec::with_capacity(columns.len());
    for col in columns {
        let name = quote_ident(&col.name, profile.quote_style)?;
        if col.data_type.trim().is_empty() {
            defs.push(format!("{} NULL", name));
        } else {
            defs.push(format!("{} {} NULL", name, col.data_type));
        }
    }

    Ok(format!(
        "{} {} ({})",
        profile.create_temp_table,
        quote_ident(staging_name, profile.quote_style)?,
        defs.join(", ")
    ))
}

/// Create the staging table for `base_table` inside `tx`.
///
/// Each attempt runs under a savepoint so a failed DDL (name collision
/// included) can be undone without aborting the transaction. After
/// [`STAGING_CREATE_ATTEMPTS`] failures the last error is returned as
/// `StagingCreate`. Dialects without savepoints get a single attempt, since
/// the failed DDL has already aborted the transaction.
pub async fn create_staging(
    tx: &dyn Transaction,
    profile: &DialectProfile,
    base_table: &str,
    columns: &[ColumnProfile],
) -> Result<StagingTable> {
    let attempts = if profile.supports_savepoints {
        STAGING_CREATE_ATTEMPTS
    } else {
        1
    };
    let mut last_error = String::new();
    let mut last_name = String::new();

    for attempt in 1..=attempts {
        let name = allocate_name(base_table, profile);
        let ddl = staging_ddl(profile, &name, columns)?;
        let savepoint = format!("stagemerge_create_{}", attempt);

        if profile.supports_savepoints {
            tx.execute(&profile.savepoint(&savepoint), &[])
                .await
                .map_err(|e| TransferError::staging_create(&name, e))?;
        }

        debug!("Creating staging table: {}", ddl);
        match tx.execute(&ddl, &[]).await {
            Ok(_) => {
                info!("Created staging table {} ({} columns)", name, columns.len());
                return Ok(StagingTable {
                    name,
                    columns: columns.iter().map(|c| c.name.clone()).collect(),
                });
            }
            Err(e) => {
                warn!(
                    "Staging table {} could not be created (attempt {}/{}): {}",
                    name, attempt, attempts, e
                );
                if profile.supports_savepoints {
                    tx.execute(&profile.rollback_to_savepoint(&savepoint), &[])
                        .await
                        .map_err(|e| TransferError::staging_create(&name, e))?;
                }
                last_error = e.to_string();
                last_name = name;
            }
        }
    }

    Err(TransferError::staging_create(last_name, last_error))
}

/// Drop the staging table.
pub async fn drop_staging(
    tx: &dyn Transaction,
    profile: &DialectProfile,
    staging: &StagingTable,
) -> Result<()> {
    let sql = format!(
        "{} {}",
        profile.drop_temp_table,
        quote_ident(&staging.name, profile.quote_style)?
    );

    tx.execute(&sql, &[])
        .await
        .map_err(|e| TransferError::cleanup(&staging.name, e))?;
    debug!("Dropped staging table {}", staging.name);
    Ok(())
}
