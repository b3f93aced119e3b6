//! Failure handling, cancellation and concurrency against a recording target.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::MockTarget;
use stagemerge::{
    DialectId, OnFail, Operation, Orchestrator, RecordBatch, SqlStep, SqlValue, TransferError,
    TransferSpec,
};
use tokio_util::sync::CancellationToken;

fn human_batch(rows: usize) -> RecordBatch {
    RecordBatch::from_rows(
        &["ItemID", "ItemName", "Quantity"],
        (0..rows)
            .map(|i| {
                vec![
                    SqlValue::text(i.to_string()),
                    SqlValue::text(format!("item-{}", i)),
                    SqlValue::I32(i as i32),
                ]
            })
            .collect(),
    )
    .unwrap()
}

fn orchestrator(target: &Arc<MockTarget>) -> Orchestrator {
    Orchestrator::new(target.clone(), target.clone())
}

fn merge_spec() -> TransferSpec {
    let mut spec = TransferSpec::new("human", Operation::Merge);
    spec.merge.match_columns = vec!["ItemID".into()];
    spec
}

fn position(statements: &[String], prefix: &str) -> usize {
    statements
        .iter()
        .position(|s| s.starts_with(prefix))
        .unwrap_or_else(|| panic!("no statement starting with {:?} in {:#?}", prefix, statements))
}

#[tokio::test]
async fn test_successful_merge_commits_once_and_drops_staging() {
    let target = Arc::new(MockTarget::human(DialectId::Postgres));
    let dataset = human_batch(3);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    let report = orch.run(&request).await.unwrap();
    assert_eq!(report.rows_loaded, 3);

    let statements = target.statements();
    let create = position(&statements, "CREATE TEMP TABLE");
    let load = position(&statements, "INSERT INTO \"_staging_human_");
    let reconcile = position(&statements, "INSERT INTO \"human\"");
    let cleanup = position(&statements, "DROP TABLE IF EXISTS");
    let commit = position(&statements, "COMMIT");
    assert!(create < load && load < reconcile && reconcile < cleanup && cleanup < commit);

    let journal = target.journal();
    assert_eq!(journal.begun, 1);
    assert_eq!(journal.commits, 1);
    assert_eq!(journal.rollbacks, 0);
    assert_eq!(journal.closes, 1);
    drop(journal);
    assert_eq!(target.live_tables(), 0);
}

#[tokio::test]
async fn test_load_failure_rolls_back_and_drops_staging() {
    let target = Arc::new(
        MockTarget::human(DialectId::Postgres).failing_on("INSERT INTO \"_staging_human_"),
    );
    let dataset = human_batch(3);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    let err = orch.run(&request).await.unwrap_err();
    assert!(matches!(err, TransferError::BatchLoad { .. }), "{}", err);
    assert!(err.to_string().starts_with("[LOAD]"));

    let statements = target.statements();
    let rollback = position(&statements, "ROLLBACK");
    assert!(statements[rollback + 1].starts_with("DROP TABLE IF EXISTS \"_staging_human_"));
    assert!(!statements.iter().any(|s| s.starts_with("INSERT INTO \"human\"")));

    let journal = target.journal();
    assert_eq!(journal.commits, 0);
    assert_eq!(journal.rollbacks, 1);
    assert_eq!(journal.closes, 1);
}

#[tokio::test]
async fn test_reconcile_error_not_overridden_by_cleanup_error() {
    let target = Arc::new(
        MockTarget::human(DialectId::Postgres)
            .failing_on("INSERT INTO \"human\"")
            .failing_on("DROP"),
    );
    let dataset = human_batch(2);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    let err = orch.run(&request).await.unwrap_err();
    assert!(matches!(err, TransferError::Reconcile { .. }), "{}", err);
    assert_eq!(target.journal().commits, 0);
}

#[tokio::test]
async fn test_cleanup_failure_after_success_is_surfaced() {
    let target = Arc::new(MockTarget::human(DialectId::Postgres).failing_on("DROP"));
    let dataset = human_batch(2);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    let err = orch.run(&request).await.unwrap_err();
    assert!(matches!(err, TransferError::Cleanup { .. }), "{}", err);
    assert!(err.to_string().starts_with("[CLEANUP]"));

    let journal = target.journal();
    assert_eq!(journal.commits, 0);
    assert_eq!(journal.rollbacks, 1);
}

#[tokio::test]
async fn test_staging_collision_retried_with_new_name() {
    let target = Arc::new(MockTarget::human(DialectId::Postgres).failing_creates(1));
    let dataset = human_batch(1);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    let report = orch.run(&request).await.unwrap();

    let statements = target.statements();
    let creates: Vec<&String> = statements
        .iter()
        .filter(|s| s.starts_with("CREATE"))
        .collect();
    assert_eq!(creates.len(), 2);
    assert_ne!(creates[0], creates[1]);
    assert!(creates[1].contains(report.staging_table.as_deref().unwrap()));
    assert!(statements.contains(&"ROLLBACK TO SAVEPOINT stagemerge_create_1".to_string()));
    assert_eq!(target.journal().commits, 1);
}

#[tokio::test]
async fn test_staging_create_failure_skips_cleanup() {
    let target = Arc::new(MockTarget::human(DialectId::Postgres).failing_creates(2));
    let dataset = human_batch(1);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    let err = orch.run(&request).await.unwrap_err();
    assert!(matches!(err, TransferError::StagingCreate { .. }), "{}", err);
    assert_eq!(err.exit_code(), 3);

    let statements = target.statements();
    assert!(!statements.iter().any(|s| s.starts_with("DROP")));
    assert!(!statements.iter().any(|s| s.starts_with("INSERT")));
    assert_eq!(target.journal().rollbacks, 1);
}

#[tokio::test]
async fn test_commit_failure_reported_after_rollback() {
    let target = Arc::new(MockTarget::human(DialectId::Postgres).failing_commit());
    let dataset = human_batch(1);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    let err = orch.run(&request).await.unwrap_err();
    assert!(matches!(err, TransferError::Commit { .. }), "{}", err);
    assert_eq!(target.journal().rollbacks, 1);
}

#[tokio::test]
async fn test_both_skips_rejected_before_touching_database() {
    for dialect in [DialectId::Mssql, DialectId::Postgres, DialectId::Mysql] {
        let target = Arc::new(MockTarget::human(dialect));
        let dataset = human_batch(1);
        let orch = orchestrator(&target);

        let mut spec = merge_spec();
        spec.merge.skip_inserts = true;
        spec.merge.skip_updates = true;

        let err = orch.request(spec, &dataset).unwrap_err();
        assert!(
            matches!(err, TransferError::InvalidMergeConfiguration(_)),
            "{}",
            err
        );
        assert_eq!(target.catalog_calls(), 0);
        assert_eq!(target.journal().begun, 0);
    }
}

#[tokio::test]
async fn test_cancellation_during_load_never_commits() {
    let target = Arc::new(
        MockTarget::human(DialectId::Postgres).with_delay(Duration::from_millis(40)),
    );
    let dataset = human_batch(50);
    let token = CancellationToken::new();
    let orch = orchestrator(&target).with_cancellation(token.clone());

    let mut spec = merge_spec();
    spec.batch_size = 5;
    let request = orch.request(spec, &dataset).unwrap();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
    });

    let err = orch.run(&request).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, TransferError::Cancelled), "{}", err);
    assert_eq!(err.exit_code(), 4);

    let statements = target.statements();
    assert!(!statements.iter().any(|s| s == "COMMIT"));
    assert!(!statements.iter().any(|s| s.starts_with("INSERT INTO \"human\"")));
    let journal = target.journal();
    assert_eq!(journal.commits, 0);
    assert_eq!(journal.rollbacks, 1);
}

#[tokio::test]
async fn test_concurrent_transfers_use_distinct_staging_tables() {
    let target = Arc::new(
        MockTarget::human(DialectId::Postgres).with_delay(Duration::from_millis(1)),
    );
    let orch = Arc::new(orchestrator(&target));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let orch = orch.clone();
        handles.push(tokio::spawn(async move {
            let dataset = human_batch(4);
            let request = orch.request(merge_spec(), &dataset)?;
            let report = orch.run(&request).await;
            report
        }));
    }

    let mut names = HashSet::new();
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        names.insert(report.staging_table.unwrap());
    }

    assert_eq!(names.len(), 100);
    assert_eq!(target.live_tables(), 0);
    let journal = target.journal();
    assert_eq!(journal.commits, 100);
    assert_eq!(journal.rollbacks, 0);
}

#[tokio::test]
async fn test_mssql_merge_uses_global_temp_table_and_single_statement() {
    let target = Arc::new(MockTarget::human(DialectId::Mssql));
    let dataset = human_batch(2);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    orch.run(&request).await.unwrap();

    let statements = target.statements();
    assert!(statements.iter().any(|s| s.starts_with("SAVE TRANSACTION")));
    assert!(statements[position(&statements, "CREATE TABLE")].contains("[##_staging_human_"));
    assert!(statements[position(&statements, "INSERT INTO")].contains("(@P1, @P2, @P3), (@P4, @P5, @P6)"));
    assert_eq!(
        statements.iter().filter(|s| s.starts_with("MERGE [human] WITH (HOLDLOCK)")).count(),
        1
    );
}

#[tokio::test]
async fn test_mysql_merge_updates_then_inserts_and_drops_temporary() {
    let target = Arc::new(MockTarget::human(DialectId::Mysql));
    let dataset = human_batch(2);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    orch.run(&request).await.unwrap();

    let statements = target.statements();
    let update = position(&statements, "UPDATE `human` AS tgt JOIN");
    let insert = position(&statements, "INSERT INTO `human`");
    let drop = position(&statements, "DROP TEMPORARY TABLE IF EXISTS `_staging_human_");
    assert!(update < insert && insert < drop);
}

#[tokio::test]
async fn test_redshift_merge_runs_without_savepoints() {
    let target = Arc::new(MockTarget::human(DialectId::Redshift));
    let dataset = human_batch(2);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    let report = orch.run(&request).await.unwrap();
    assert_eq!(report.rows_loaded, 2);

    let statements = target.statements();
    assert!(!statements.iter().any(|s| s.contains("SAVEPOINT")), "{:#?}", statements);
    let create = position(&statements, "CREATE TEMP TABLE \"_staging_human_");
    let load = position(&statements, "INSERT INTO \"_staging_human_");
    let update = position(&statements, "UPDATE \"human\" AS tgt SET");
    let insert = position(&statements, "INSERT INTO \"human\"");
    let cleanup = position(&statements, "DROP TABLE IF EXISTS \"_staging_human_");
    assert!(create < load && load < update && update < insert && insert < cleanup);
    assert!(statements[load].contains("$1::text"));
    assert_eq!(statements.last().unwrap(), "COMMIT");
    assert_eq!(target.journal().commits, 1);
}

#[tokio::test]
async fn test_redshift_staging_failure_is_not_retried() {
    let target = Arc::new(MockTarget::human(DialectId::Redshift).failing_creates(1));
    let dataset = human_batch(1);
    let orch = orchestrator(&target);
    let request = orch.request(merge_spec(), &dataset).unwrap();

    let err = orch.run(&request).await.unwrap_err();
    assert!(matches!(err, TransferError::StagingCreate { .. }), "{}", err);

    let statements = target.statements();
    assert_eq!(statements.iter().filter(|s| s.starts_with("CREATE")).count(), 1);
    assert!(!statements.iter().any(|s| s.contains("SAVEPOINT")));
    assert_eq!(target.journal().rollbacks, 1);
}

#[tokio::test]
async fn test_pre_and_post_sql_wrap_the_transfer() {
    let target = Arc::new(MockTarget::human(DialectId::Postgres));
    let dataset = human_batch(1);
    let orch = orchestrator(&target);

    let mut spec = merge_spec();
    spec.pre_sql = vec!["SET LOCAL lock_timeout = '5s'".into()];
    spec.post_sql = vec!["ANALYZE \"human\"".into()];
    let request = orch.request(spec, &dataset).unwrap();
    orch.run(&request).await.unwrap();

    let statements = target.statements();
    let pre = position(&statements, "SET LOCAL");
    let create = position(&statements, "CREATE");
    let drop = position(&statements, "DROP");
    let post = position(&statements, "ANALYZE");
    assert!(pre < create && drop < post);
    assert_eq!(statements.last().unwrap(), "COMMIT");
}

#[tokio::test]
async fn test_failing_step_marked_continue_rolls_back_to_savepoint() {
    let target = Arc::new(MockTarget::human(DialectId::Postgres).failing_on("CALL"));
    let dataset = human_batch(1);
    let orch = orchestrator(&target);

    let mut spec = merge_spec();
    spec.pre_sql = vec![
        SqlStep::procedure("refresh_stats", serde_yaml::from_str("{days: 7}").unwrap())
            .with_on_fail(OnFail::Continue),
    ];
    let request = orch.request(spec, &dataset).unwrap();
    orch.run(&request).await.unwrap();

    let statements = target.statements();
    assert_eq!(
        &statements[..3],
        &[
            "SAVEPOINT stagemerge_step".to_string(),
            "CALL \"refresh_stats\"($1::bigint)".to_string(),
            "ROLLBACK TO SAVEPOINT stagemerge_step".to_string(),
        ]
    );
    assert_eq!(target.journal().commits, 1);
}

#[tokio::test]
async fn test_failing_step_fails_transfer_by_default() {
    let target = Arc::new(MockTarget::human(DialectId::Mssql).failing_on("EXEC"));
    let dataset = human_batch(1);
    let orch = orchestrator(&target);

    let mut spec = merge_spec();
    spec.post_sql = vec![SqlStep::procedure("dbo.nightly", Default::default())];
    let request = orch.request(spec, &dataset).unwrap();

    let err = orch.run(&request).await.unwrap_err();
    assert!(matches!(err, TransferError::Reconcile { .. }), "{}", err);
    assert!(err.to_string().contains("post-SQL failed"));
    assert!(target.statements().contains(&"EXEC [dbo].[nightly]".to_string()));
    let journal = target.journal();
    assert_eq!(journal.commits, 0);
    assert_eq!(journal.rollbacks, 1);
}

#[tokio::test]
async fn test_continue_step_rejected_without_savepoints() {
    let target = Arc::new(MockTarget::human(DialectId::Redshift));
    let dataset = human_batch(1);
    let orch = orchestrator(&target);

    let mut spec = merge_spec();
    spec.pre_sql = vec![SqlStep::from("VACUUM human").with_on_fail(OnFail::Continue)];
    let err = orch.request(spec, &dataset).unwrap_err();
    assert!(matches!(err, TransferError::Config(_)), "{}", err);
    assert_eq!(target.journal().begun, 0);
}

#[tokio::test]
async fn test_refresh_with_empty_dataset_only_deletes() {
    let target = Arc::new(MockTarget::human(DialectId::Postgres));
    let dataset = human_batch(0);
    let orch = orchestrator(&target);
    let request = orch
        .request(TransferSpec::new("human", Operation::Refresh), &dataset)
        .unwrap();

    let report = orch.run(&request).await.unwrap();
    assert_eq!(report.rows_loaded, 0);
    assert_eq!(
        target.statements(),
        vec!["DELETE FROM \"human\"".to_string(), "COMMIT".to_string()]
    );
}

#[tokio::test]
async fn test_health_check_pings_provider() {
    let target = Arc::new(MockTarget::human(DialectId::Sqlite));
    orchestrator(&target).health_check().await.unwrap();
}
