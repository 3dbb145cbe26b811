//! Sirene Sync - keeps the Sirene registry database up to date

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sirene_common::logging::{init_logging, LogConfig, LogLevel};
use sirene_sync::ingest::{HistoryStore, PgHistory, Scheduler};
use sirene_sync::{app, db, Config};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "sirene-sync")]
#[command(author, version, about = "Sirene open data synchronisation")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an update cycle now and then every SIRENE_EVERY_X_HOURS hours
    Run,

    /// Run a single update cycle and exit
    Once,

    /// Show what the next cycle would download and remove
    Plan,

    /// Show the most recent import records
    History {
        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: i64,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sirene-sync")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let config = Config::load().context("Failed to load configuration")?;
    let pool = db::create_pool(&config.database).await?;
    db::health_check(&pool).await.context("Database is not reachable")?;
    db::run_migrations(&pool).await?;

    match cli.command {
        Command::Run => {
            let planner = Arc::new(app::build_planner(&config, pool)?);
            let shutdown = CancellationToken::new();

            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                }
                signal.cancel();
            });

            Scheduler::new(planner, config.sync.interval()).run(shutdown).await;
        },
        Command::Once => {
            let planner = app::build_planner(&config, pool)?;
            let cancel = CancellationToken::new();

            let signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal.cancel();
                }
            });

            let report = planner.run_cycle(&cancel).await?;
            if report.failed() > 0 {
                error!(failed = report.failed(), "Some archives failed to import");
                anyhow::bail!("{} of {} archives failed", report.failed(), report.outcomes.len());
            }
        },
        Command::Plan => {
            let planner = app::build_planner(&config, pool)?;
            let preview = planner.plan_only().await?;

            println!("Remote archives: {}", preview.remote.len());
            println!("Already applied: {}", preview.applied);
            println!("To download ({}):", preview.to_download.len());
            for name in &preview.to_download {
                println!("  {name}");
            }
            println!("To remove ({}):", preview.removable.len());
            for path in &preview.removable {
                println!("  {}", path.display());
            }
        },
        Command::History { limit, json } => {
            let records = PgHistory::new(pool).recent(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    let status = if record.is_success { "ok" } else { "FAILED" };
                    println!(
                        "{}  {:<6}  {:<7}  {}  {}",
                        record.datetime.format("%Y-%m-%d %H:%M:%S"),
                        status,
                        record.file_type,
                        record.filename,
                        record.err
                    );
                }
            }
        },
    }

    Ok(())
}
