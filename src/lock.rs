//! Per-path mutual exclusion for tools that are not concurrency-safe.
//!
//! One coordinator per pipeline; the host constructs exactly one pipeline,
//! which gives the process-wide semantics. Distinct paths proceed in
//! parallel; same-path acquisitions queue in FIFO order (tokio mutexes are
//! fair).

use crate::permission::normalize_path;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive hold on one path. Released on drop, on every exit path —
/// cancellation and panics included.
#[derive(Debug)]
pub struct FileLockGuard {
    _guard: OwnedMutexGuard<()>,
    path: PathBuf,
}

impl FileLockGuard {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Default)]
pub struct FileLockCoordinator {
    locks: StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLockCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Await exclusive access to `path`. The key is the lexically
    /// normalized path, so `/tmp/./f` and `/tmp/f` share a lock.
    pub async fn acquire(&self, path: &Path) -> FileLockGuard {
        let key = normalize_path(path);
        let mutex = {
            let mut locks = self.locks.lock().expect("file lock map poisoned");
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = mutex.lock_owned().await;
        FileLockGuard {
            _guard: guard,
            path: key,
        }
    }

    /// Drop map entries nobody holds or waits on. Never evicts a key with
    /// a live holder: the guard keeps the Arc alive, so its strong count
    /// stays above one.
    pub fn evict_idle(&self) {
        let mut locks = self.locks.lock().expect("file lock map poisoned");
        locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    #[must_use]
    pub fn tracked_paths(&self) -> usize {
        self.locks.lock().expect("file lock map poisoned").len()
    }
}
