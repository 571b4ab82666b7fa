//! Per-key throttle for repeated pulls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Marks between sweeps of expired entries.
const PRUNE_EVERY: usize = 256;

/// Remembers when a key last ran and refuses it again inside the window.
#[derive(Debug)]
pub struct SyncThrottle {
    window: Duration,
    marks: DashMap<String, Instant>,
    inserts: AtomicUsize,
}

impl SyncThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            marks: DashMap::new(),
            inserts: AtomicUsize::new(0),
        }
    }

    /// Whether `key` ran within the window. Expired marks are dropped.
    pub fn is_throttled(&self, key: &str) -> bool {
        let window = self.window;
        let expired = match self.marks.get(key) {
            None => return false,
            Some(at) => at.elapsed() >= window,
        };
        if expired {
            self.marks.remove_if(key, |_, at| at.elapsed() >= window);
        }
        !expired
    }

    /// Records a run of `key`. Every few marks, keys whose window has
    /// passed are swept so patients that never come back are not kept.
    pub fn mark(&self, key: impl Into<String>) {
        self.marks.insert(key.into(), Instant::now());
        if (self.inserts.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            self.prune();
        }
    }

    fn prune(&self) {
        let window = self.window;
        self.marks.retain(|_, at| at.elapsed() < window);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.marks.len()
    }
}
