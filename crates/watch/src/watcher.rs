use std::path::{Component, Path, PathBuf};

use dropzone_import::{Coordinator, IngestError, IngestReport};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::drain::{contains_csv, csv_files, is_csv, DrainDetector, DrainState};
use crate::pending::PendingWork;
use crate::trigger::AggregationTrigger;

/// Ingests one file. Implemented by [`Coordinator`]; tests substitute a fake.
#[allow(async_fn_in_trait)]
pub trait Ingest {
    async fn ingest(&self, account_id: &str, path: &Path) -> Result<IngestReport, IngestError>;
}

impl Ingest for Coordinator {
    async fn ingest(&self, account_id: &str, path: &Path) -> Result<IngestReport, IngestError> {
        self.ingest_file(account_id, path).await
    }
}

/// Account owning `path`: its parent directory relative to `root`, with
/// components joined by `/`. `None` for files directly under `root`.
pub fn account_for(root: &Path, path: &Path) -> Option<String> {
    let parent = path.strip_prefix(root).ok()?.parent()?;
    let parts: Vec<&str> = parent
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// The watcher worker: serializes ingestion and decides when the tree has drained.
pub struct Dropzone<I: Ingest> {
    root: PathBuf,
    ingest: I,
    pending: PendingWork,
    drain: DrainDetector,
    trigger: AggregationTrigger,
}

impl<I: Ingest> Dropzone<I> {
    pub fn new(root: PathBuf, ingest: I, trigger: AggregationTrigger) -> Self {
        Self {
            root,
            ingest,
            pending: PendingWork::new(),
            drain: DrainDetector::new(),
            trigger,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn state(&self) -> DrainState {
        self.drain.state()
    }

    /// Treat every CSV already in the tree as freshly detected, then check
    /// for drain once.
    pub async fn startup_sweep(&mut self) -> std::io::Result<()> {
        let existing = csv_files(&self.root)?;
        info!(files = existing.len(), "Ingesting existing files in {}", self.root.display());
        if existing.is_empty() {
            self.check_drain();
        } else {
            self.handle_batch(existing).await;
        }
        Ok(())
    }

    /// Process paths in arrival order. All are registered as pending first.
    pub async fn handle_batch(&mut self, paths: Vec<PathBuf>) {
        let mut accepted = Vec::with_capacity(paths.len());
        for path in paths {
            if !is_csv(&path) || !path.is_file() {
                continue;
            }
            if self.pending.begin(&path) {
                accepted.push(path);
            }
        }
        if accepted.is_empty() {
            return;
        }
        self.drain.mark_busy();

        for path in accepted {
            self.process(&path).await;
            if self.pending.finish(&path) == 0 {
                self.check_drain();
            }
        }
    }

    async fn process(&mut self, path: &Path) {
        let Some(account_id) = account_for(&self.root, path) else {
            warn!("{}", IngestError::NoAccount(path.to_path_buf()));
            return;
        };
        info!(account = %account_id, "New .csv file detected: {}", path.display());

        if let Err(e) = self.ingest.ingest(&account_id, path).await {
            warn!(account = %account_id, "Failed to ingest {}, left in place: {e}", path.display());
        }
    }

    fn check_drain(&mut self) {
        let csv_remaining = match contains_csv(&self.root) {
            Ok(found) => found,
            Err(e) => {
                warn!("Could not scan {}: {e}", self.root.display());
                true
            }
        };
        if self.drain.observe(self.pending.len(), csv_remaining) {
            if let Err(e) = self.trigger.on_drain() {
                warn!("Could not queue aggregation: {e}");
            }
        }
    }

    /// Consume detected paths until the channel closes. Everything already
    /// queued is taken as one batch so the pending count covers it.
    pub async fn run(mut self, mut rx: mpsc::Receiver<PathBuf>) {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while let Ok(more) = rx.try_recv() {
                batch.push(more);
            }
            self.handle_batch(batch).await;
        }
    }
}

// ── Watch-folder integration ──────────────────────────────────────────────────

/// Spawn a recursive notify watcher on `watch_dir` that sends created (or
/// moved-in) file paths to `tx`. The returned watcher must be kept alive.
///
/// A create event can arrive before the writer finishes, so files should be
/// written elsewhere and renamed into the dropzone.
pub fn spawn_dropzone_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::event::{ModifyKind, RenameMode};
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(ev) => {
                let arrived = matches!(
                    ev.kind,
                    EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
                );
                if arrived {
                    for path in ev.paths {
                        // Runs on notify's own thread, so blocking is fine.
                        if tx.blocking_send(path).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("Watch error: {e}"),
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::Recursive)?;
    Ok(watcher)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
