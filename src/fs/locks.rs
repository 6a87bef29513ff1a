//! Per-destination write exclusion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Concurrent set of destination paths currently being written.
///
/// Two tasks racing toward the same file resolve through `acquire`: the
/// loser skips without writing. Scoped to one process run.
#[derive(Default)]
pub struct PathLocks {
    inner: Mutex<HashSet<PathBuf>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for writing; false when another task already holds it.
    pub fn acquire(&self, path: &Path) -> bool {
        self.inner.lock().unwrap().insert(path.to_path_buf())
    }

    /// Release a previously acquired path.
    pub fn release(&self, path: &Path) {
        self.inner.lock().unwrap().remove(path);
    }
}
