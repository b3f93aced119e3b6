//! Batch loader.
//!
//! Splits a dataset into consecutive chunks and writes each chunk with one
//! multi-row parameterized `INSERT`. Chunks go through a bounded in-flight
//! window on the caller's transaction: a window of one processes them in
//! order, a larger window keeps several statements in flight on the session.

use std::ops::Range;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::{quote_list, Dataset, Row, SqlValue, TableRef, Transaction};
use crate::dialect::DialectProfile;
use crate::error::{ChunkFailure, Result, TransferError};

/// Default rows per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Loader settings for one transfer.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Upper bound on rows per INSERT statement.
    pub batch_size: usize,
    /// Chunks kept in flight at once (1 = sequential).
    pub parallel_workers: usize,
    /// Aborts dispatch and in-flight chunks when cancelled.
    pub cancel: CancellationToken,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallel_workers: 1,
            cancel: CancellationToken::new(),
        }
    }
}

/// What a load wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows_loaded: u64,
    pub chunks: usize,
}

/// Rows per chunk after applying the dialect's parameter and row limits.
pub fn effective_chunk_size(profile: &DialectProfile, batch_size: usize, column_count: usize) -> usize {
    let by_params = profile.max_params / column_count.max(1);
    let mut size = batch_size.min(by_params);
    if let Some(max_rows) = profile.max_rows_per_insert {
        size = size.min(max_rows);
    }
    size.max(1)
}

/// Consecutive, non-overlapping ranges covering `0..len`.
pub fn chunk_ranges(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let step = chunk_size.max(1);
    (0..len)
        .step_by(step)
        .map(|start| start..(start + step).min(len))
        .collect()
}

/// Render the INSERT for one chunk and collect its parameters in row-major order.
pub fn build_insert<'r>(
    profile: &DialectProfile,
    table: &TableRef,
    columns: &[String],
    rows: &'r [Row],
) -> Result<(String, Vec<SqlValue<'r>>)> {
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut tuples = Vec::with_capacity(rows.len());

    for row in rows {
        let mut placeholders = Vec::with_capacity(row.len());
        for value in row {
            params.push(value.reborrow());
            placeholders.push(profile.placeholder(params.len(), value));
        }
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table.quoted(profile.quote_style)?,
        quote_list(columns, profile.quote_style)?,
        tuples.join(", ")
    );
    Ok((sql, params))
}

/// Load every dataset row into `table` inside `tx`.
///
/// An empty dataset is a no-op. On the first chunk failure no further chunks
/// are dispatched; chunks already in flight are drained and every failure
/// seen is reported in one `BatchLoad` error. Cancellation drops in-flight
/// statements and returns `Cancelled`.
pub async fn load(
    tx: &dyn Transaction,
    profile: &DialectProfile,
    table: &TableRef,
    dataset: &dyn Dataset,
    options: &LoadOptions,
) -> Result<LoadStats> {
    let columns = dataset.columns();
    if columns.is_empty() {
        return Err(TransferError::Config("dataset has no columns".into()));
    }
    if options.batch_size == 0 {
        return Err(TransferError::Config("batch_size must be at least 1".into()));
    }

    let chunk_size = effective_chunk_size(profile, options.batch_size, columns.len());
    let ranges = chunk_ranges(dataset.len(), chunk_size);
    let total_chunks = ranges.len();
    if total_chunks == 0 {
        debug!("Dataset is empty, nothing to load into {}", table);
        return Ok(LoadStats::default());
    }

    let window = options.parallel_workers.max(1);
    info!(
        "Loading {} rows into {} ({} chunks of up to {} rows, {} in flight)",
        dataset.len(),
        table,
        total_chunks,
        chunk_size,
        window
    );

    let mut pending = ranges.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();
    let mut failures: Vec<ChunkFailure> = Vec::new();
    let mut stats = LoadStats::default();
    let mut cancelled = false;

    loop {
        while failures.is_empty() && !options.cancel.is_cancelled() && in_flight.len() < window {
            let Some((index, range)) = pending.next() else {
                break;
            };
            let rows = dataset.rows(range.clone());
            in_flight.push(async move {
                let result = match build_insert(profile, table, columns, rows) {
                    Ok((sql, params)) => tx.execute(&sql, &params).await,
                    Err(e) => Err(e),
                };
                (index, range, result)
            });
        }

        if in_flight.is_empty() {
            break;
        }

        let finished = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                cancelled = true;
                break;
            }
            next = in_flight.next() => next,
        };

        match finished {
            Some((index, range, Ok(_))) => {
                debug!("Chunk {}/{} loaded ({} rows)", index + 1, total_chunks, range.len());
                stats.rows_loaded += range.len() as u64;
                stats.chunks += 1;
            }
            Some((index, range, Err(e))) => {
                failures.push(ChunkFailure {
                    chunk_index: index,
                    first_row: range.start,
                    rows: range.len(),
                    message: e.to_string(),
                });
            }
            None => break,
        }
    }

    // dropping the window aborts whatever was still running
    drop(in_flight);

    if cancelled || options.cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    if !failures.is_empty() {
        failures.sort_by_key(|f| f.chunk_index);
        return Err(TransferError::BatchLoad {
            table: table.to_string(),
            failures,
        });
    }

    Ok(stats)
}
