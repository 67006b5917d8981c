//! Capacity- and age-bounded LRU cache.
//!
//! Values are held as [`Arc`]s and replaced wholesale on insert, so a reader
//! holding a value never observes a later write. Time is measured with
//! [`tokio::time::Instant`], which lets tests drive expiry with paused time.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;

/// Default number of entries a cache holds.
pub const DEFAULT_CAPACITY: usize = 100;
/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

struct Entry<V> {
    value: Arc<V>,
    inserted: Instant,
    tick: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Recency index: lowest tick is least recently used.
    order: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }
}

/// Thread-safe LRU cache with a per-entry time to live.
pub struct LruCache<K, V> {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
            }),
        }
    }

    /// Fetch a live entry, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let expired = inner
            .entries
            .get(key)
            .map(|entry| entry.inserted.elapsed() >= self.ttl)?;
        if expired {
            inner.remove(key);
            return None;
        }
        let tick = inner.bump();
        let entry = inner.entries.get_mut(key)?;
        let old = std::mem::replace(&mut entry.tick, tick);
        let value = Arc::clone(&entry.value);
        inner.order.remove(&old);
        inner.order.insert(tick, key.clone());
        Some(value)
    }

    /// Insert or replace an entry, evicting the least recently used one if
    /// the cache is full.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.remove(&key);
        while inner.entries.len() >= self.capacity {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
        let tick = inner.bump();
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value: Arc::clone(&value),
                inserted: Instant::now(),
                tick,
            },
        );
        value
    }

    pub fn invalidate(&self, key: &K) { self.inner.lock().remove(key); }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize { self.inner.lock().entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
