//! Parsed-activity cache keyed by transcript path and modification time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::activity::AgentActivity;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub mtime: SystemTime,
    pub activity: AgentActivity,
}

/// Owned by exactly one writer at a time: the monitor actor, or the poll
/// work unit it lent the cache to.
#[derive(Debug, Default)]
pub struct ActivityCache {
    entries: HashMap<PathBuf, CacheEntry>,
}

impl ActivityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached activity for `path`, only if it was parsed at exactly `mtime`.
    pub fn lookup(&self, path: &Path, mtime: SystemTime) -> Option<&AgentActivity> {
        self.entries
            .get(path)
            .filter(|e| e.mtime == mtime)
            .map(|e| &e.activity)
    }

    /// Last parsed activity for `path` regardless of mtime.  Never a cache
    /// hit; used as the base to fold newly appended lines onto.
    pub fn previous(&self, path: &Path) -> Option<&AgentActivity> {
        self.entries.get(path).map(|e| &e.activity)
    }

    pub fn insert(&mut self, path: PathBuf, mtime: SystemTime, activity: AgentActivity) {
        self.entries.insert(path, CacheEntry { mtime, activity });
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the oldest entries by mtime until at most `max` remain.
    /// Returns how many were removed.
    pub fn evict_oldest(&mut self, max: usize) -> usize {
        if self.entries.len() <= max {
            return 0;
        }
        let mut by_age: Vec<(SystemTime, PathBuf)> = self
            .entries
            .iter()
            .map(|(p, e)| (e.mtime, p.clone()))
            .collect();
        by_age.sort();

        let excess = self.entries.len() - max;
        for (_, path) in by_age.into_iter().take(excess) {
            self.entries.remove(&path);
        }
        excess
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
