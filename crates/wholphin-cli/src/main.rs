use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wholphin_sync::{build_scheduler, SyncConfig, SyncPipeline};
use wholphin_web::AppState;

#[derive(Debug, Parser)]
#[command(name = "wholphin")]
#[command(about = "Wholphin sales/revenue reporting backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the HTTP API plus the daily sync scheduler.
    Serve,
    /// Run one synchronization now: full when a target sheet is given,
    /// remote-only otherwise.
    Sync {
        #[arg(long)]
        target: Option<PathBuf>,
    },
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let pipeline = Arc::new(SyncPipeline::new(config)?);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if let Some(scheduler) = build_scheduler(pipeline.clone()).await? {
                scheduler.start().await?;
                info!("daily sync scheduler started");
            }
            wholphin_web::serve_from_env(AppState::new(pipeline)).await?;
        }
        Commands::Sync { target } => {
            let report = match target {
                Some(path) => pipeline.run_full_from_sheet(&path).await?,
                None => pipeline.run_remote_only().await?,
            };
            println!(
                "sync complete: run_id={} orders={} revenues={} sales={} targets={} dropped_sales={} dropped_revenues={}",
                report.run_id,
                report.inserted_orders,
                report.inserted_revenues,
                report.inserted_sales,
                report.inserted_targets,
                report.dropped_sales_rows,
                report.dropped_revenue_rows,
            );
        }
        Commands::Migrate => {
            sqlx::migrate!("../../migrations").run(pipeline.pool()).await?;
            info!("migrations applied");
        }
    }

    Ok(())
}
