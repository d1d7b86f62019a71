use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-artifact mutexes so one stale artifact is rendered once, not once per
/// concurrent request. Entries are dropped again when their last holder leaves.
#[derive(Default, Clone)]
pub struct ArtifactLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ArtifactLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other request holds `path`, then hold it until the guard drops.
    pub async fn acquire(&self, path: &Path) -> ArtifactGuard {
        let lock = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ArtifactGuard {
            path: path.to_path_buf(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of artifact paths currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct ArtifactGuard {
    path: PathBuf,
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.path, |_, lock| Arc::strong_count(lock) == 1);
    }
}
