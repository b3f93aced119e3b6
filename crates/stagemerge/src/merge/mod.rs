//! Reconcile statement synthesis.
//!
//! [`MergeStatement`] captures everything that decides the shape of the
//! reconcile SQL (column sets and skip flags). [`synthesize`] renders it for
//! the profile's [`UpsertFamily`]. Identifiers are always quoted through the
//! profile's quote style.

use serde::{Deserialize, Serialize};

use crate::core::{find_column, primary_key_of, quote_ident, ColumnProfile, TableRef};
use crate::dialect::{DialectProfile, UpdateJoinStyle, UpsertFamily};
use crate::error::{Result, TransferError};

const TARGET_ALIAS: &str = "tgt";
const SOURCE_ALIAS: &str = "src";

/// Caller-controlled merge behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Columns whose equality identifies the same row. Defaults to the primary key.
    pub match_columns: Vec<String>,
    /// Conflict target for `ON CONFLICT`. Defaults to the match columns.
    pub constraint_columns: Vec<String>,
    pub skip_inserts: bool,
    pub skip_updates: bool,
    /// Keep target rows that are absent from the dataset.
    pub skip_deletes: bool,
    /// Include match columns in the INSERT column list.
    pub insert_match_columns: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            match_columns: Vec::new(),
            constraint_columns: Vec::new(),
            skip_inserts: false,
            skip_updates: false,
            skip_deletes: true,
            insert_match_columns: true,
        }
    }
}

impl MergeOptions {
    /// Reject flag combinations that leave nothing to do.
    pub fn validate(&self) -> Result<()> {
        if self.skip_inserts && self.skip_updates {
            return Err(TransferError::InvalidMergeConfiguration(
                "skip_inserts and skip_updates cannot both be set".into(),
            ));
        }
        Ok(())
    }
}

/// Fully resolved reconcile plan for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatement {
    pub target: TableRef,
    /// Staging columns, in dataset order.
    pub columns: Vec<String>,
    pub match_columns: Vec<String>,
    pub constraint_columns: Vec<String>,
    /// `columns` minus match columns.
    pub update_columns: Vec<String>,
    /// `columns` minus identity columns (minus match columns when opted out).
    pub insert_columns: Vec<String>,
    pub skip_inserts: bool,
    pub skip_updates: bool,
    pub skip_deletes: bool,
}

fn contains_ignore_case(list: &[String], name: &str) -> bool {
    list.iter().any(|c| c.eq_ignore_ascii_case(name))
}

impl MergeStatement {
    /// Resolve column sets against the dataset columns and the target's catalog snapshot.
    ///
    /// # Errors
    ///
    /// - `InvalidMergeConfiguration` when both inserts and updates are skipped
    /// - `Config` when no match columns are given and the target has no
    ///   primary key, or when a match column is not in the dataset
    pub fn new(
        target: TableRef,
        columns: &[String],
        profiles: &[ColumnProfile],
        options: &MergeOptions,
    ) -> Result<Self> {
        options.validate()?;

        let requested = if options.match_columns.is_empty() {
            primary_key_of(profiles)
        } else {
            options.match_columns.clone()
        };
        if requested.is_empty() {
            return Err(TransferError::Config(format!(
                "merge into {} needs match columns: none were given and the table has no primary key",
                target
            )));
        }

        // use the dataset's spelling of each match column
        let match_columns = requested
            .iter()
            .map(|m| {
                columns
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(m))
                    .cloned()
                    .ok_or_else(|| {
                        TransferError::Config(format!(
                            "match column '{}' is not in the dataset",
                            m
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let constraint_columns = if options.constraint_columns.is_empty() {
            match_columns.clone()
        } else {
            options.constraint_columns.clone()
        };

        let update_columns = columns
            .iter()
            .filter(|c| !contains_ignore_case(&match_columns, c))
            .cloned()
            .collect();

        let insert_columns = columns
            .iter()
            .filter(|c| {
                let identity = find_column(profiles, c)
                    .map(|p| p.is_autoincrement)
                    .unwrap_or(false);
                let excluded_match =
                    !options.insert_match_columns && contains_ignore_case(&match_columns, c);
                !identity && !excluded_match
            })
            .cloned()
            .collect();

        Ok(Self {
            target,
            columns: columns.to_vec(),
            match_columns,
            constraint_columns,
            update_columns,
            insert_columns,
            skip_inserts: options.skip_inserts,
            skip_updates: options.skip_updates,
            skip_deletes: options.skip_deletes,
        })
    }

    fn has_update_branch(&self) -> bool {
        !self.skip_updates && !self.update_columns.is_empty()
    }

    fn has_insert_branch(&self) -> bool {
        !self.skip_inserts && !self.insert_columns.is_empty()
    }
}

/// Identifier renderer bound to one profile.
struct Sql<'p> {
    profile: &'p DialectProfile,
    staging: &'p TableRef,
}

impl Sql<'_> {
    fn ident(&self, name: &str) -> Result<String> {
        quote_ident(name, self.profile.quote_style)
    }

    fn table(&self, table: &TableRef) -> Result<String> {
        table.quoted(self.profile.quote_style)
    }

    fn staging(&self) -> Result<String> {
        self.staging.quoted(self.profile.quote_style)
    }

    fn list(&self, cols: &[String]) -> Result<String> {
        Ok(cols
            .iter()
            .map(|c| self.ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", "))
    }

    fn prefixed_list(&self, prefix: &str, cols: &[String]) -> Result<String> {
        Ok(cols
            .iter()
            .map(|c| Ok(format!("{}.{}", prefix, self.ident(c)?)))
            .collect::<Result<Vec<_>>>()?
            .join(", "))
    }

    /// `a.k1 = b.k1 AND a.k2 = b.k2`
    fn match_condition(&self, left: &str, right: &str, cols: &[String]) -> Result<String> {
        Ok(cols
            .iter()
            .map(|c| {
                let col = self.ident(c)?;
                Ok(format!("{}.{} = {}.{}", left, col, right, col))
            })
            .collect::<Result<Vec<_>>>()?
            .join(" AND "))
    }

    /// `c1 = src.c1, c2 = src.c2` (or `tgt.c1 = ...` when `qualify_target`)
    fn assignments(&self, source: &str, cols: &[String], qualify_target: bool) -> Result<String> {
        Ok(cols
            .iter()
            .map(|c| {
                let col = self.ident(c)?;
                if qualify_target {
                    Ok(format!("{}.{} = {}.{}", TARGET_ALIAS, col, source, col))
                } else {
                    Ok(format!("{} = {}.{}", col, source, col))
                }
            })
            .collect::<Result<Vec<_>>>()?
            .join(", "))
    }
}

/// Render the statements that reconcile `staging` into `stmt.target`, to be
/// executed in order.
///
/// May return an empty list when the resolved column sets leave nothing to
/// reconcile (for example, only match columns and `skip_inserts`).
pub fn synthesize(
    profile: &DialectProfile,
    stmt: &MergeStatement,
    staging: &TableRef,
) -> Result<Vec<String>> {
    if stmt.skip_inserts && stmt.skip_updates {
        return Err(TransferError::InvalidMergeConfiguration(
            "skip_inserts and skip_updates cannot both be set".into(),
        ));
    }

    let sql = Sql { profile, staging };
    let mut statements = match profile.upsert_family {
        UpsertFamily::NativeMerge => native_merge(&sql, stmt)?.into_iter().collect(),
        UpsertFamily::InsertOnConflict => insert_on_conflict(&sql, stmt)?,
        UpsertFamily::GenericUpdateInsert => generic_update_insert(&sql, stmt)?,
    };

    if profile.upsert_family != UpsertFamily::NativeMerge && !stmt.skip_deletes {
        statements.push(delete_missing(&sql, stmt)?);
    }

    Ok(statements)
}

fn native_merge(sql: &Sql<'_>, stmt: &MergeStatement) -> Result<Option<String>> {
    let mut branches = Vec::new();

    if stmt.has_update_branch() {
        branches.push(format!(
            "WHEN MATCHED THEN UPDATE SET {}",
            sql.assignments("temp", &stmt.update_columns, false)?
        ));
    }
    if stmt.has_insert_branch() {
        branches.push(format!(
            "WHEN NOT MATCHED BY TARGET THEN INSERT ({}) VALUES ({})",
            sql.list(&stmt.insert_columns)?,
            sql.prefixed_list("temp", &stmt.insert_columns)?
        ));
    }
    if !stmt.skip_deletes {
        branches.push("WHEN NOT MATCHED BY SOURCE THEN DELETE".to_string());
    }

    if branches.is_empty() {
        return Ok(None);
    }

    Ok(Some(format!(
        "MERGE {} WITH (HOLDLOCK) AS main USING (SELECT {} FROM {}) AS temp ON ({}) {};",
        sql.table(&stmt.target)?,
        sql.list(&stmt.columns)?,
        sql.staging()?,
        sql.match_condition("main", "temp", &stmt.match_columns)?,
        branches.join(" ")
    )))
}

fn insert_on_conflict(sql: &Sql<'_>, stmt: &MergeStatement) -> Result<Vec<String>> {
    if stmt.skip_inserts {
        // no insert half: only the update of existing rows remains
        return Ok(update_from_staging(sql, stmt)?.into_iter().collect());
    }

    let action = if stmt.has_update_branch() {
        format!(
            "DO UPDATE SET {}",
            sql.assignments("EXCLUDED", &stmt.update_columns, false)?
        )
    } else {
        "DO NOTHING".to_string()
    };
    let filter = if sql.profile.on_conflict_needs_where {
        " WHERE true"
    } else {
        ""
    };
    let columns = sql.list(&stmt.columns)?;

    Ok(vec![format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}{} ON CONFLICT ({}) {}",
        sql.table(&stmt.target)?,
        columns,
        columns,
        sql.staging()?,
        filter,
        sql.list(&stmt.constraint_columns)?,
        action
    )])
}

fn generic_update_insert(sql: &Sql<'_>, stmt: &MergeStatement) -> Result<Vec<String>> {
    let mut statements = Vec::new();

    if let Some(update) = update_from_staging(sql, stmt)? {
        statements.push(update);
    }

    if stmt.has_insert_branch() {
        let target = sql.table(&stmt.target)?;
        let first_match = sql.ident(&stmt.match_columns[0])?;
        statements.push(format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} AS {} LEFT JOIN {} AS {} ON {} WHERE {}.{} IS NULL",
            target,
            sql.list(&stmt.insert_columns)?,
            sql.prefixed_list(SOURCE_ALIAS, &stmt.insert_columns)?,
            sql.staging()?,
            SOURCE_ALIAS,
            target,
            TARGET_ALIAS,
            sql.match_condition(TARGET_ALIAS, SOURCE_ALIAS, &stmt.match_columns)?,
            TARGET_ALIAS,
            first_match
        ));
    }

    Ok(statements)
}

fn update_from_staging(sql: &Sql<'_>, stmt: &MergeStatement) -> Result<Option<String>> {
    if !stmt.has_update_branch() {
        return Ok(None);
    }

    let target = sql.table(&stmt.target)?;
    let staging = sql.staging()?;
    let condition = sql.match_condition(TARGET_ALIAS, SOURCE_ALIAS, &stmt.match_columns)?;

    let update = match sql.profile.update_join_style {
        UpdateJoinStyle::FromClause => format!(
            "UPDATE {} AS {} SET {} FROM {} AS {} WHERE {}",
            target,
            TARGET_ALIAS,
            sql.assignments(SOURCE_ALIAS, &stmt.update_columns, false)?,
            staging,
            SOURCE_ALIAS,
            condition
        ),
        UpdateJoinStyle::JoinClause => format!(
            "UPDATE {} AS {} JOIN {} AS {} ON {} SET {}",
            target,
            TARGET_ALIAS,
            staging,
            SOURCE_ALIAS,
            condition,
            sql.assignments(SOURCE_ALIAS, &stmt.update_columns, true)?
        ),
    };
    Ok(Some(update))
}

fn delete_missing(sql: &Sql<'_>, stmt: &MergeStatement) -> Result<String> {
    let target = sql.table(&stmt.target)?;
    let condition = sql.match_condition(SOURCE_ALIAS, &target, &stmt.match_columns)?;
    Ok(format!(
        "DELETE FROM {} WHERE NOT EXISTS (SELECT 1 FROM {} AS {} WHERE {})",
        target,
        sql.staging()?,
        SOURCE_ALIAS,
        condition
    ))
}
