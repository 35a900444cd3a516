use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dropzone_core::{SchemaResolver, Settings};
use dropzone_import::Coordinator;
use dropzone_watch::{spawn_aggregation_worker, spawn_dropzone_watcher, Dropzone};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "dropzone",
    version,
    about = "Watch a folder for bank CSV exports and load them into SQLite"
)]
struct Cli {
    /// Configuration file (defaults to $DROPZONE_CONFIG, then ./dropzone.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run(Cli::parse()).await {
        error!(error = %err, "service failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = absolute(&Settings::locate(cli.config))?;
    let settings = Settings::load(&config_path)?;
    info!("Using configuration {}", config_path.display());

    let dropzone_dir = prepare_dir(&settings.service.dropzone)?;
    let completed_dir = prepare_dir(&settings.service.completed)?;

    let db = dropzone_storage::create_db(&settings.service.database)
        .await
        .with_context(|| format!("opening {}", settings.service.database.display()))?;

    let coordinator = Coordinator::new(db, SchemaResolver::new(config_path.clone()), completed_dir);
    let (trigger, _aggregation) = spawn_aggregation_worker(settings.aggregation, config_path);
    let mut dropzone = Dropzone::new(dropzone_dir.clone(), coordinator, trigger);

    // Start watching before the sweep so files dropped meanwhile are queued.
    // The watcher must be kept alive for the lifetime of the service.
    let (tx, rx) = mpsc::channel::<PathBuf>(64);
    let _watcher = spawn_dropzone_watcher(&dropzone_dir, tx)
        .with_context(|| format!("watching {}", dropzone_dir.display()))?;

    dropzone
        .startup_sweep()
        .await
        .with_context(|| format!("scanning {}", dropzone_dir.display()))?;
    info!("Watching dropzone: {}", dropzone_dir.display());

    tokio::select! {
        _ = dropzone.run(rx) => info!("Watcher channel closed"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for interrupt")?;
            info!("Interrupted, shutting down");
        }
    }
    Ok(())
}

fn prepare_dir(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    dir.canonicalize()
        .with_context(|| format!("resolving {}", dir.display()))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("reading current directory")?;
    Ok(cwd.join(path))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
