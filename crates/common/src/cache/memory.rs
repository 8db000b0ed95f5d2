use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

/// In-process cache with optional capacity and LRU eviction.
///
/// There is no TTL: an entry lives until evicted by capacity or `clear`.
pub struct BoundedCache<V> {
    /// `None` when capacity is zero
    inner: Option<Mutex<LruCache<String, V>>>,
}

impl<V: Clone> BoundedCache<V> {
    /// `None` means unbounded. `Some(0)` disables storage entirely.
    pub fn new(max_entries: Option<usize>) -> Self {
        let inner = match max_entries {
            None => Some(LruCache::unbounded()),
            Some(max) => NonZeroUsize::new(max).map(LruCache::new),
        };
        Self {
            inner: inner.map(Mutex::new),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<String, V>>> {
        // Entries stay consistent even if a holder panicked mid-read
        self.inner
            .as_ref()
            .map(|inner| inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock()?.get(key).cloned()
    }

    pub fn insert(&self, key: String, value: V) {
        let Some(mut inner) = self.lock() else {
            return;
        };
        if let Some((evicted, _)) = inner.push(key.clone(), value) {
            if evicted != key {
                tracing::debug!(key = %evicted, "Cache eviction");
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().is_some_and(|inner| inner.contains(key))
    }

    /// Remove everything; returns the number of removed entries.
    pub fn clear(&self) -> usize {
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let count = inner.len();
        inner.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().map_or(0, |inner| inner.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
