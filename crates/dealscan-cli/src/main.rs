use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use dealscan_core::Source;
use dealscan_storage::{connect_store, run_migrations, PgRecordStore};
use dealscan_sync::{
    interactive_response, maybe_build_scheduler, orchestrator_from_config, NoopContinuation,
    ProgressSink, ScanConfig, ScanPhase, ScanProgressEvent,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "dealscan")]
#[command(about = "Resumable deal scan ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the scan endpoints (and the in-process scheduler when enabled).
    Serve,
    /// Apply database migrations.
    Migrate,
    /// Scan one source, or every enabled source, in this process.
    Scan {
        #[arg(long)]
        source: Option<Source>,
    },
    /// Print a record and its snapshot history as JSON.
    History {
        #[arg(long)]
        source: Source,
        #[arg(long)]
        external_id: String,
    },
}

/// Prints one line per progress event.
struct ConsoleProgress;

#[async_trait]
impl ProgressSink for ConsoleProgress {
    async fn emit(&self, event: ScanProgressEvent) {
        let message = event.message.as_deref().unwrap_or_default();
        match event.phase {
            ScanPhase::Error => eprintln!("[{}] {message}", event.event_name()),
            _ => println!("[{}] {message}", event.event_name()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dealscan=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config = ScanConfig::from_env();
    tracing::debug!(?config, "configuration loaded");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let store = connect_store(config.database_url.as_deref()).await?;
            let state = dealscan_web::state_from_config(&config, store).await?;
            let scheduler = maybe_build_scheduler(&config, state.orchestrator.clone()).await?;
            if let Some(scheduler) = &scheduler {
                scheduler.start().await.context("starting scheduler")?;
            }
            dealscan_web::serve(state, config.web_port).await?;
        }
        Commands::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required to migrate")?;
            let store = PgRecordStore::connect(url)
                .await
                .context("connecting to database")?;
            run_migrations(store.pool()).await?;
            println!("migrations applied");
        }
        Commands::Scan { source } => {
            let store = connect_store(config.database_url.as_deref()).await?;
            let orchestrator =
                orchestrator_from_config(&config, store, Arc::new(NoopContinuation)).await?;
            let totals = orchestrator.run_interactive(source, &ConsoleProgress).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&interactive_response(&totals))?
            );
        }
        Commands::History {
            source,
            external_id,
        } => {
            let store = connect_store(config.database_url.as_deref()).await?;
            let history = store
                .history(source, &external_id)
                .await?
                .with_context(|| format!("no record {source}/{external_id}"))?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
    }

    Ok(())
}
