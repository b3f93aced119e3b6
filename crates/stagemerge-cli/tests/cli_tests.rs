//! CLI integration tests for stagemerge.
//!
//! These tests verify command-line argument parsing, help output,
//! exit codes for error conditions, and one end-to-end run against SQLite.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;

/// Get a command for the stagemerge binary.
fn cmd() -> Command {
    Command::cargo_bin("stagemerge").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--table"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--workers"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stagemerge"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_and_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_rust_log_overrides_verbosity() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());

    cmd()
        .env("RUST_LOG", "info")
        .args(["--config", config.to_str().unwrap(), "--verbosity", "error", "health-check"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Loaded configuration"));

    cmd()
        .env_remove("RUST_LOG")
        .args(["--config", config.to_str().unwrap(), "--verbosity", "error", "health-check"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Loaded configuration").not());
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_dialect_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  type: oracle").unwrap();
    writeln!(file, "  host: db").unwrap();
    writeln!(file, "tables:").unwrap();
    writeln!(file, "  - table: human").unwrap();
    writeln!(file, "    source: {{ csv: human.csv }}").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn test_both_skips_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  type: sqlite").unwrap();
    writeln!(file, "  path: /tmp/never-opened.db").unwrap();
    writeln!(file, "tables:").unwrap();
    writeln!(file, "  - table: human").unwrap();
    writeln!(file, "    source: {{ csv: human.csv }}").unwrap();
    writeln!(file, "    skip_inserts: true").unwrap();
    writeln!(file, "    skip_updates: true").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("skip_inserts"));
}

// =============================================================================
// End-to-End Against SQLite
// =============================================================================

fn create_human_table(db: &Path) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(db)
            .create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
        sqlx::query("CREATE TABLE human (ItemID TEXT PRIMARY KEY, ItemName TEXT, Quantity INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO human VALUES ('1', 'Laptop', 10)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    });
}

fn read_human_table(db: &Path) -> Vec<(String, String, i64)> {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let pool = sqlx::SqlitePool::connect_with(
            sqlx::sqlite::SqliteConnectOptions::new().filename(db),
        )
        .await
        .unwrap();
        let rows = sqlx::query_as("SELECT ItemID, ItemName, Quantity FROM human ORDER BY ItemID")
            .fetch_all(&pool)
            .await
            .unwrap();
        pool.close().await;
        rows
    })
}

fn write_workspace(dir: &Path) -> std::path::PathBuf {
    let db = dir.join("target.db");
    create_human_table(&db);

    std::fs::write(
        dir.join("human.csv"),
        "ItemID,ItemName,Quantity\n1,Laptop,12\n2,Chair,5\n",
    )
    .unwrap();

    let config = dir.join("config.yaml");
    std::fs::write(
        &config,
        format!(
            "target:\n  type: sqlite\n  path: {}\ntables:\n  - table: human\n    source: {{ csv: human.csv }}\n    match_columns: [ItemID]\n",
            db.display()
        ),
    )
    .unwrap();
    config
}

#[test]
fn test_run_merges_csv_into_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "--output-json", "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rows_loaded\": 2"))
        .stdout(predicate::str::contains("\"operation\": \"merge\""));

    assert_eq!(
        read_human_table(&dir.path().join("target.db")),
        vec![
            ("1".to_string(), "Laptop".to_string(), 12),
            ("2".to_string(), "Chair".to_string(), 5),
        ]
    );
}

#[test]
fn test_plan_prints_statements_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CREATE TEMP TABLE"))
        .stdout(predicate::str::contains("ON CONFLICT (\"ItemID\") DO UPDATE SET"));

    assert_eq!(
        read_human_table(&dir.path().join("target.db")),
        vec![("1".to_string(), "Laptop".to_string(), 10)]
    );
}

#[test]
fn test_run_unknown_table_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "run", "--table", "robot"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("robot"));
}

#[test]
fn test_health_check_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_workspace(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "health-check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Target (sqlite): OK"));
}

fn create_feed_database(db: &Path) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(db)
            .create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
        sqlx::query("CREATE TABLE stock_feed (ItemID TEXT, ItemName TEXT, Quantity INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO stock_feed VALUES ('2', 'Chair', 5), ('3', 'Desk', 1), ('9', 'Lamp', 0)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    });
}

#[test]
fn test_run_with_database_source_and_sql_files() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("target.db");
    create_human_table(&db);
    create_feed_database(&dir.path().join("feed.db"));

    std::fs::write(
        dir.path().join("extract.sql"),
        "SELECT ItemID, ItemName, Quantity FROM stock_feed WHERE Quantity > 0",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("retire.sql"),
        "UPDATE human SET Quantity = 0 WHERE ItemID = '1'",
    )
    .unwrap();

    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        format!(
            "target:\n  type: sqlite\n  path: {}\n\
             tables:\n  - table: human\n    match_columns: [ItemID]\n\
             \x20   source:\n      connection: {{ type: sqlite, path: feed.db }}\n      query: extract.sql\n\
             \x20   pre_sql: [retire.sql]\n\
             \x20   post_sql:\n      - DELETE FROM human WHERE Quantity = 0\n",
            db.display()
        ),
    )
    .unwrap();

    cmd()
        .args(["--config", config.to_str().unwrap(), "--output-json", "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rows_loaded\": 2"));

    assert_eq!(
        read_human_table(&db),
        vec![
            ("2".to_string(), "Chair".to_string(), 5),
            ("3".to_string(), "Desk".to_string(), 1),
        ]
    );
}

#[test]
fn test_plan_reads_source_table() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("target.db");
    create_human_table(&db);
    create_feed_database(&dir.path().join("feed.db"));

    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        format!(
            "target:\n  type: sqlite\n  path: {}\n\
             tables:\n  - table: human\n    operation: insert\n\
             \x20   source:\n      connection: {{ type: sqlite, path: feed.db }}\n      table: stock_feed\n",
            db.display()
        ),
    )
    .unwrap();

    cmd()
        .args(["--config", config.to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 rows"));
}
