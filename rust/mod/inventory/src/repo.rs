//! The in-memory working set, owned by one engine for one session.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::Platform;

/// Everything loaded from the primary tier.
#[derive(Debug, Default, Clone)]
pub struct WorkingSet {
    /// Parsed platforms by collection key.
    pub platforms: BTreeMap<String, Platform>,
    /// Records that could not be parsed: collection key to parse error.
    pub quarantined: BTreeMap<String, String>,
}

impl WorkingSet {
    pub fn get(&self, id: &str) -> Option<&Platform> {
        self.platforms.get(id)
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Put `platform` under its own id, dropping `old_key` if it differs.
    pub fn commit(&mut self, old_key: Option<&str>, platform: Platform) {
        if let Some(old) = old_key {
            if old != platform.id() {
                self.platforms.remove(old);
            }
        }
        self.platforms.insert(platform.id().to_string(), platform);
    }
}

/// Single-writer repository around the working set.
///
/// Locks are held only for the duration of a synchronous read or commit,
/// never across a remote call.
#[derive(Debug, Default)]
pub struct Repository {
    inner: RwLock<WorkingSet>,
}

impl Repository {
    pub fn read(&self) -> RwLockReadGuard<'_, WorkingSet> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, WorkingSet> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole working set.
    pub fn reset(&self, set: WorkingSet) {
        *self.write() = set;
    }

    /// Clone of one platform.
    pub fn get(&self, id: &str) -> Option<Platform> {
        self.read().get(id).cloned()
    }

    /// Clone of every platform, ordered by key.
    pub fn all(&self) -> Vec<Platform> {
        self.read().platforms.values().cloned().collect()
    }
}
