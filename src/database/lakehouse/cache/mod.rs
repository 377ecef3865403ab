
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    branch: String,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: Arc<V>,
    inserted_at: Instant,
}

/// Memoizes lakehouse query results per `(query text, branch)`.
///
/// Entries expire after `ttl`; a zero ttl disables caching. Writers call
/// [`QueryCache::invalidate_branch`] so a branch never serves stale rows.
#[derive(Debug)]
pub struct QueryCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry<V>>>,
}

impl<V> QueryCache<V> {
    #[inline]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry<V>>> {
        // Entries are plain values, a panicked writer cannot leave them half-updated
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn get(&self, query: &str, branch: &str) -> Option<Arc<V>> {
        if self.ttl.is_zero() {
            return None;
        }

        let key = CacheKey {
            query: query.to_string(),
            branch: branch.to_string(),
        };
        let mut entries = self.lock();
        match entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                debug!("Cache hit on branch {}", branch);
                Some(Arc::clone(&entry.value))
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store `value` and hand back the shared copy
    #[inline]
    pub fn insert(&self, query: &str, branch: &str, value: V) -> Arc<V> {
        let value = Arc::new(value);
        if self.ttl.is_zero() {
            return value;
        }

        let key = CacheKey {
            query: query.to_string(),
            branch: branch.to_string(),
        };
        self.lock().insert(
            key,
            CacheEntry {
                value: Arc::clone(&value),
                inserted_at: Instant::now(),
            },
        );
        value
    }

    #[inline]
    pub fn invalidate_branch(&self, branch: &str) {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| key.branch != branch);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Invalidated {} cached queries on branch {}", removed, branch);
        }
    }

    #[inline]
    pub fn clear(&self) {
        self.lock().clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
