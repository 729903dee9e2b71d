//! Per-user serialization of read-modify-write cycles within one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One mutex per user key, created on first use
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`
    ///
    /// A panic inside an earlier holder does not wedge the key: the lock only
    /// guards ordering, the data itself lives in the store.
    pub fn with_key<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }
}
