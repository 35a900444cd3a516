use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Files between detection and their terminal outcome (archived or failed).
///
/// Owned by the watcher worker; nothing else mutates it.
#[derive(Debug, Default)]
pub struct PendingWork {
    in_flight: HashSet<PathBuf>,
}

impl PendingWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detected file. Returns `false` if it is already pending.
    pub fn begin(&mut self, path: &Path) -> bool {
        self.in_flight.insert(path.to_path_buf())
    }

    /// Record a terminal outcome and return how many files remain pending.
    pub fn finish(&mut self, path: &Path) -> usize {
        self.in_flight.remove(path);
        self.in_flight.len()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
