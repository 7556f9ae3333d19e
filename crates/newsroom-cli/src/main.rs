use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use newsroom_storage::SqliteArticleStore;
use newsroom_sync::{start_scheduler, Newsroom, SyncConfig};
use newsroom_web::AppState;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "newsroom")]
#[command(about = "Headline fetch, enrichment and briefing service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one fetch in the foreground and exit.
    Fetch,
    /// Create or upgrade the article database.
    Migrate,
    /// Serve the web API, with the periodic scheduler unless disabled.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        no_scheduler: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Fetch) {
        Commands::Fetch => {
            let newsroom = Newsroom::from_config(config).await?;
            let outcome = newsroom.service.run_now().await?;
            println!(
                "fetch {}: run_id={} fetched={} duplicates={} stored={} failed={}",
                outcome.state,
                outcome.run_id,
                outcome.fetched,
                outcome.skipped_duplicates,
                outcome.stored,
                outcome.failed
            );
        }
        Commands::Migrate => {
            let store = SqliteArticleStore::connect(&config.database_url)
                .await
                .with_context(|| format!("connecting to {}", config.database_url))?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied to {}", config.database_url);
        }
        Commands::Serve { port, no_scheduler } => {
            let port = port.unwrap_or(config.web_port);
            let run_scheduler = config.scheduler_enabled && !no_scheduler;
            let cron = config.pipeline.cron.clone();
            let newsroom = Newsroom::from_config(config).await?;

            let scheduler = if run_scheduler {
                Some(start_scheduler(newsroom.service.clone(), &cron).await?)
            } else {
                info!("scheduler disabled");
                None
            };

            newsroom_web::serve(AppState::from_newsroom(&newsroom), port).await?;

            if let Some(mut sched) = scheduler {
                if let Err(err) = sched.shutdown().await {
                    warn!(error = %err, "scheduler shutdown failed");
                }
            }
        }
    }

    Ok(())
}
