use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use dropzone_core::settings::CONFIG_ENV;
use dropzone_core::AggregationSettings;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Aggregation command is empty")]
    EmptyCommand,
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with {status}")]
    ExitStatus { program: String, status: ExitStatus },
    #[error("Aggregation worker has stopped")]
    Closed,
}

/// One request to rebuild the merchant registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationJob {
    /// Sequence number of the drain that produced this job.
    pub drain: u64,
}

/// Hands drain events to the aggregation worker without waiting for it.
///
/// The queue holds one job: a drain arriving while a job is still queued
/// is folded into that job.
#[derive(Debug)]
pub struct AggregationTrigger {
    tx: mpsc::Sender<AggregationJob>,
    drains: u64,
}

impl AggregationTrigger {
    pub fn new(tx: mpsc::Sender<AggregationJob>) -> Self {
        Self { tx, drains: 0 }
    }

    pub fn on_drain(&mut self) -> Result<(), TriggerError> {
        self.drains += 1;
        match self.tx.try_send(AggregationJob { drain: self.drains }) {
            Ok(()) => {
                info!(drain = self.drains, "Dropzone drained, aggregation queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                info!(drain = self.drains, "Aggregation already queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TriggerError::Closed),
        }
    }

    pub fn drains(&self) -> u64 {
        self.drains
    }
}

/// Start the worker that runs the external aggregation (and, if enabled,
/// enrichment) process for each queued job. Children see the service's
/// configuration path in `DROPZONE_CONFIG`.
pub fn spawn_aggregation_worker(
    settings: AggregationSettings,
    config_path: PathBuf,
) -> (AggregationTrigger, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AggregationJob>(1);

    let handle = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            run_job(&settings, &config_path, job).await;
        }
    });

    (AggregationTrigger::new(tx), handle)
}

async fn run_job(settings: &AggregationSettings, config_path: &Path, job: AggregationJob) {
    info!(drain = job.drain, "Running merchant aggregation");
    if let Err(e) = run_command(&settings.command, config_path, settings.timeout()).await {
        error!(drain = job.drain, "Merchant aggregation failed: {e}");
        return;
    }
    info!(drain = job.drain, "Merchant aggregation completed");

    if !settings.enrich {
        return;
    }
    info!(drain = job.drain, "Running merchant enrichment");
    match run_command(&settings.enrich_command, config_path, settings.timeout()).await {
        Ok(()) => info!(drain = job.drain, "Merchant enrichment completed"),
        Err(e) => error!(drain = job.drain, "Merchant enrichment failed: {e}"),
    }
}

/// Run `argv` to completion, killing it if it outlives `timeout`.
pub async fn run_command(argv: &[String], config_path: &Path, timeout: Duration) -> Result<(), TriggerError> {
    let (program, args) = argv.split_first().ok_or(TriggerError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(args)
        .env(CONFIG_ENV, config_path)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TriggerError::Spawn { program: program.clone(), source })?;

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.map_err(|source| TriggerError::Spawn { program: program.clone(), source })?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(TriggerError::Timeout { program: program.clone(), timeout });
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(TriggerError::ExitStatus { program: program.clone(), status })
    }
}
