//! Shared log of permanently failed paths

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::newtypes::RelPath;

/// Append-only set of rejected paths, shared by every worker of a run
///
/// Cloning is cheap and yields a handle onto the same log. Appends are
/// serialized by an internal mutex.
#[derive(Debug, Clone, Default)]
pub struct RejectionLog {
    inner: Arc<Mutex<BTreeSet<RelPath>>>,
}

impl RejectionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rejected path; returns `false` if it was already present
    pub fn add(&self, path: RelPath) -> bool {
        self.lock().insert(path)
    }

    #[must_use]
    pub fn contains(&self, path: &RelPath) -> bool {
        self.lock().contains(path)
    }

    /// Snapshot of all rejected paths, sorted
    #[must_use]
    pub fn paths(&self) -> Vec<RelPath> {
        self.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A poisoned lock still holds a valid set; nothing is half-inserted.
    fn lock(&self) -> MutexGuard<'_, BTreeSet<RelPath>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
