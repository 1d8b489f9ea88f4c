use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use atlas_pipeline::{AtlasConfig, CountryService};
use atlas_store::{CountryStore, PgCountryStore};

#[derive(Debug, Parser)]
#[command(name = "atlas-cli")]
#[command(about = "Atlas country data service command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API (and the cron scheduler when enabled).
    Serve,
    /// Run one refresh cycle against the configured database.
    Refresh,
    /// Apply pending database migrations and exit.
    Migrate,
}

async fn connect_store(config: &AtlasConfig) -> Result<PgCountryStore> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    let store = PgCountryStore::new(pool);
    store.migrate().await.context("running migrations")?;
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => atlas_web::serve_from_env().await?,
        Commands::Refresh => {
            let config = AtlasConfig::from_env();
            let store: Arc<dyn CountryStore> = Arc::new(connect_store(&config).await?);
            let service = CountryService::from_config(&config, store)?;
            let outcome = service.refresh().await?;
            println!(
                "refresh complete: count={} image={}",
                outcome.count,
                service.summary_image_path().display()
            );
        }
        Commands::Migrate => {
            let config = AtlasConfig::from_env();
            connect_store(&config).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
