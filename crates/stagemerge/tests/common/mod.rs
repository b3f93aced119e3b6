//! Recording in-memory target shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stagemerge::{
    ColumnProfile, ConnectionProvider, DialectId, Result, SchemaCatalog, SqlValue, TableRef,
    Transaction, TransferError,
};

/// What every transaction handed out by a [`MockTarget`] did.
#[derive(Debug, Default)]
pub struct Journal {
    pub statements: Vec<String>,
    pub begun: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub closes: usize,
}

/// In-memory target that records SQL and fails on request.
pub struct MockTarget {
    dialect: DialectId,
    columns: Vec<ColumnProfile>,
    journal: Arc<Mutex<Journal>>,
    /// Staging tables currently created across all sessions.
    live_tables: Arc<Mutex<HashSet<String>>>,
    fail_on: Vec<String>,
    fail_creates: usize,
    fail_commit: bool,
    delay: Option<Duration>,
    catalog_calls: AtomicUsize,
}

impl MockTarget {
    pub fn new(dialect: DialectId, columns: Vec<ColumnProfile>) -> Self {
        Self {
            dialect,
            columns,
            journal: Arc::new(Mutex::new(Journal::default())),
            live_tables: Arc::new(Mutex::new(HashSet::new())),
            fail_on: Vec::new(),
            fail_creates: 0,
            fail_commit: false,
            delay: None,
            catalog_calls: AtomicUsize::new(0),
        }
    }

    /// `human(ItemID PK, ItemName, Quantity)`.
    pub fn human(dialect: DialectId) -> Self {
        Self::new(
            dialect,
            vec![
                ColumnProfile::new("ItemID", "varchar(10)").primary_key(1),
                ColumnProfile::new("ItemName", "varchar(50)"),
                ColumnProfile::new("Quantity", "int"),
            ],
        )
    }

    /// Fail every statement starting with `prefix`.
    pub fn failing_on(mut self, prefix: &str) -> Self {
        self.fail_on.push(prefix.to_string());
        self
    }

    /// Fail the first `n` staging CREATE statements.
    pub fn failing_creates(mut self, n: usize) -> Self {
        self.fail_creates = n;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Sleep before every statement.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }

    pub fn statements(&self) -> Vec<String> {
        self.journal().statements.clone()
    }

    pub fn live_tables(&self) -> usize {
        self.live_tables.lock().unwrap().len()
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for MockTarget {
    fn dialect(&self) -> DialectId {
        self.dialect
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.journal().begun += 1;
        Ok(Box::new(MockTx {
            journal: self.journal.clone(),
            live_tables: self.live_tables.clone(),
            fail_on: self.fail_on.clone(),
            creates_to_fail: AtomicUsize::new(self.fail_creates),
            fail_commit: self.fail_commit,
            delay: self.delay,
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SchemaCatalog for MockTarget {
    async fn columns(&self, _table: &TableRef) -> Result<Vec<ColumnProfile>> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.columns.clone())
    }
}

struct MockTx {
    journal: Arc<Mutex<Journal>>,
    live_tables: Arc<Mutex<HashSet<String>>>,
    fail_on: Vec<String>,
    creates_to_fail: AtomicUsize,
    fail_commit: bool,
    delay: Option<Duration>,
}

/// Table name following a `CREATE ...` or `DROP ...` verb.
fn table_name(sql: &str) -> Option<String> {
    let quoted = sql.split_whitespace().find(|w| w.contains("_staging_"))?;
    Some(
        quoted
            .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
            .to_string(),
    )
}

#[async_trait]
impl Transaction for MockTx {
    async fn execute(&self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.journal.lock().unwrap().statements.push(sql.to_string());

        if self.fail_on.iter().any(|p| sql.starts_with(p.as_str())) {
            return Err(TransferError::Config(format!("injected failure: {}", sql)));
        }

        if sql.starts_with("CREATE") {
            if self
                .creates_to_fail
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransferError::Config("table already exists".into()));
            }
            if let Some(name) = table_name(sql) {
                if !self.live_tables.lock().unwrap().insert(name.clone()) {
                    return Err(TransferError::Config(format!("{} already exists", name)));
                }
            }
            return Ok(0);
        }

        if sql.starts_with("DROP") {
            if let Some(name) = table_name(sql) {
                self.live_tables.lock().unwrap().remove(&name);
            }
            return Ok(0);
        }

        if sql.starts_with("INSERT") && !params.is_empty() {
            // one row per VALUES tuple
            return Ok(sql.matches("), (").count() as u64 + 1);
        }

        Ok(1)
    }

    async fn commit(&mut self) -> Result<()> {
        let mut journal = self.journal.lock().unwrap();
        journal.statements.push("COMMIT".into());
        if self.fail_commit {
            return Err(TransferError::Config("serialization failure".into()));
        }
        journal.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let mut journal = self.journal.lock().unwrap();
        journal.statements.push("ROLLBACK".into());
        journal.rollbacks += 1;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.journal.lock().unwrap().closes += 1;
        Ok(())
    }
}
