//! stagemerge CLI - transactional insert, refresh and merge transfers.

use clap::{Parser, Subcommand};
use stagemerge::config::resolve_sql;
use stagemerge::drivers::{self, Target};
use stagemerge::{
    Config, Orchestrator, RecordBatch, SourceConfig, TableConfig, TableRef, TransferError,
    TransferReport,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "stagemerge")]
#[command(about = "Transactional insert, refresh and merge of datasets into SQL tables")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured transfers
    Run {
        /// Only run the transfer for this table
        #[arg(long)]
        table: Option<String>,

        /// Override rows per INSERT statement
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override concurrent INSERT statements per transfer
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show the SQL a run would execute without writing anything
    Plan {
        /// Only plan the transfer for this table
        #[arg(long)]
        table: Option<String>,
    },

    /// Test the target database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), TransferError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| TransferError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);
    let base_dir = cli
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let cancel_token = setup_signal_handler();
    if let Some(secs) = config.transfer.timeout_seconds {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            eprintln!("\nTimeout of {}s reached. Cancelling...", secs);
            token.cancel();
        });
    }

    match cli.command {
        Commands::Run {
            table,
            batch_size,
            workers,
        } => {
            let tables = config.select_tables(table.as_deref())?;
            let target = drivers::connect(&config.target).await?;
            let orchestrator = Orchestrator::new(target.provider.clone(), target.catalog.clone())
                .with_cancellation(cancel_token);

            let mut reports = Vec::with_capacity(tables.len());
            for entry in tables {
                let mut spec = entry.to_spec(&config.transfer, &base_dir)?;
                if let Some(b) = batch_size {
                    spec.batch_size = b;
                }
                if let Some(w) = workers {
                    spec.parallel_workers = w;
                }

                let dataset = load_dataset(&target, entry, &base_dir).await?;
                let request = orchestrator.request(spec, &dataset)?;
                let report = orchestrator.run(&request).await?;
                if !cli.output_json {
                    print_report(&report);
                }
                reports.push(report);
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                println!("\nTransfers completed: {}", reports.len());
            }
        }

        Commands::Plan { table } => {
            let tables = config.select_tables(table.as_deref())?;
            let target = drivers::connect(&config.target).await?;
            let orchestrator = Orchestrator::new(target.provider.clone(), target.catalog.clone());

            let mut plans = Vec::with_capacity(tables.len());
            for entry in tables {
                let dataset = load_dataset(&target, entry, &base_dir).await?;
                let spec = entry.to_spec(&config.transfer, &base_dir)?;
                let request = orchestrator.request(spec, &dataset)?;
                plans.push(orchestrator.plan(&request).await?);
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plans)?);
            } else {
                for plan in &plans {
                    println!(
                        "\n{} {} ({}): {} rows in {} chunk(s) of up to {}",
                        plan.operation,
                        plan.table,
                        plan.dialect,
                        plan.rows,
                        plan.chunks,
                        plan.rows_per_chunk
                    );
                    for sql in &plan.statements {
                        println!("  {};", sql.trim_end_matches(';'));
                    }
                }
            }
        }

        Commands::HealthCheck => {
            let target = drivers::connect(&config.target).await?;
            let orchestrator = Orchestrator::new(target.provider.clone(), target.catalog.clone());
            orchestrator.health_check().await?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({ "dialect": target.dialect(), "healthy": true })
                );
            } else {
                println!("Health Check Results:");
                println!("  Target ({}): OK", target.dialect());
            }
        }
    }

    Ok(())
}

/// Read a table entry's source and coerce it to the target's column types.
async fn load_dataset(
    target: &Target,
    entry: &TableConfig,
    base_dir: &Path,
) -> Result<RecordBatch, TransferError> {
    let table = TableRef::new(entry.schema.as_deref(), &entry.table);
    table.validate()?;

    let batch = match &entry.source {
        SourceConfig::Csv { csv } => RecordBatch::from_csv_path(base_dir.join(csv))?,
        SourceConfig::Sqlite { sqlite, query } => {
            let query = resolve_sql(query, base_dir)?;
            RecordBatch::from_sqlite_query(&base_dir.join(sqlite), &query).await?
        }
        SourceConfig::Database {
            connection,
            table: source_table,
            schema,
            query,
        } => {
            let mut connection = connection.clone();
            if let Some(path) = connection.path.take() {
                connection.path = Some(base_dir.join(path));
            }
            let source = drivers::connect(&connection).await?;
            info!("Reading {} source for {}", source.dialect(), table);
            match (source_table, query) {
                (Some(name), _) => {
                    source
                        .read_table(&TableRef::new(schema.as_deref(), name))
                        .await?
                }
                (None, Some(query)) => source.read_query(&resolve_sql(query, base_dir)?).await?,
                (None, None) => {
                    return Err(TransferError::Config(format!(
                        "{}: a database source needs a table or a query",
                        table
                    )))
                }
            }
        }
    };

    let profiles = target.catalog.columns(&table).await?;
    batch.coerce_to(&profiles)
}

fn print_report(report: &TransferReport) {
    println!("\n{} into {} completed", report.operation, report.table);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_ms as f64 / 1000.0);
    if let Some(ref staging) = report.staging_table {
        println!("  Staging table: {}", staging);
    }
    if report.rows_deleted > 0 {
        println!("  Rows deleted: {}", report.rows_deleted);
    }
    println!("  Rows loaded: {} ({} chunks)", report.rows_loaded, report.chunks);
    println!("  Rows reconciled: {}", report.rows_reconciled);
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Rolling back...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Rolling back...");
        token.cancel();
    });

    cancel_token
}
