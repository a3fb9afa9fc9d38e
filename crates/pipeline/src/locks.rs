//! Per-key async mutexes.
//!
//! The reconciler serializes fileset writes per (owner, reporting period)
//! in-process; the store adds its own exclusive write scope for writers in
//! other processes.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks.entry(key).or_default().clone()
        };
        mutex.lock_owned().await
    }

    /// Keys currently held or waited on.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|m| Arc::strong_count(m) > 1).count()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
