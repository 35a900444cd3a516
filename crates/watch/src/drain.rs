use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Nothing pending and no CSV left in the tree.
    Idle,
    /// Files pending, or unarchived CSVs still present.
    Draining,
}

/// Decides when the dropzone has drained. Fires only on the transition
/// `Draining -> Idle`, so a quiet tree never triggers twice.
#[derive(Debug)]
pub struct DrainDetector {
    state: DrainState,
}

impl Default for DrainDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainDetector {
    /// Starts in `Draining` so the check after the startup sweep can fire.
    pub fn new() -> Self {
        Self { state: DrainState::Draining }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn mark_busy(&mut self) {
        self.state = DrainState::Draining;
    }

    /// Returns `true` when this observation completes a drain.
    pub fn observe(&mut self, pending: usize, csv_remaining: bool) -> bool {
        if pending > 0 || csv_remaining {
            self.state = DrainState::Draining;
            return false;
        }
        let fired = self.state == DrainState::Draining;
        self.state = DrainState::Idle;
        fired
    }
}

pub fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

/// Every CSV file under `root`, recursively, sorted.
pub fn csv_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    visit(root, &mut found, false)?;
    found.sort();
    Ok(found)
}

/// Full tree walk; stops at the first CSV.
pub fn contains_csv(root: &Path) -> io::Result<bool> {
    let mut found = Vec::new();
    visit(root, &mut found, true)?;
    Ok(!found.is_empty())
}

fn visit(dir: &Path, found: &mut Vec<PathBuf>, first_only: bool) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            visit(&path, found, first_only)?;
        } else if path.is_file() && is_csv(&path) {
            found.push(path);
        }
        if first_only && !found.is_empty() {
            return Ok(());
        }
    }
    Ok(())
}
