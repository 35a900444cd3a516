use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dropzone_core::Settings;
use dropzone_merchant::{aggregate, enrich, OpenAiClient};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "dropzone-merchant",
    version,
    about = "Rebuild the merchant registry from imported transactions"
)]
struct Cli {
    /// Configuration file (defaults to $DROPZONE_CONFIG, then ./dropzone.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill in location and category metadata for merchants that have none
    Enrich,
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run(Cli::parse()).await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = Settings::locate(cli.config);
    let settings = Settings::load(&config_path)?;
    let pool = dropzone_storage::create_db(&settings.service.database)
        .await
        .with_context(|| format!("opening {}", settings.service.database.display()))?;

    match cli.command {
        None => {
            let merchants = aggregate(&pool).await?;
            info!(merchants, "Aggregation finished");
        }
        Some(Command::Enrich) => {
            let client = OpenAiClient::from_settings(&settings.enrichment)?;
            let updated = enrich(&pool, &client, &settings.enrichment).await?;
            info!(updated, "Enrichment finished");
        }
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
