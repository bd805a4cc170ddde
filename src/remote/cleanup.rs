//! Tracking of remote paths a deploy has written.
//!
//! Deploy registers every destination it pushes; cleanup drains the
//! registry and removes those paths from the target.

use std::path::PathBuf;

/// Registry of remote paths that need removing once a run ends.
#[derive(Debug, Default, Clone)]
pub struct CleanupRegistry {
    paths: Vec<PathBuf>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a remote path for cleanup. Registering twice is a no-op.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.paths.contains(&path) {
            return;
        }
        self.paths.push(path);
    }

    /// Registered paths, in registration order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Empties the registry, returning what it held.
    pub fn take(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.paths)
    }
}
