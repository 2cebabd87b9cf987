use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// How long an entry stays valid after insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Valid for the lifetime of the cache
    Never,
    /// Expires once `now - inserted_at` exceeds the duration
    After(Duration),
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Key/value cache with optional TTL and capacity bound
///
/// Expired entries are evicted lazily when read. When the capacity is reached
/// expired entries are purged first, then the oldest insertion is dropped.
/// All time-dependent methods take `now` explicitly so callers (and tests)
/// control the monotonic clock.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    expiry: Expiry,
    max_entries: Option<usize>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache whose entries expire `ttl` after insertion
    ///
    /// # Arguments
    ///
    /// * `ttl` - Lifetime of each entry
    /// * `max_entries` - Maximum number of entries kept at once
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            expiry: Expiry::After(ttl),
            max_entries: Some(max_entries.max(1)),
        }
    }

    /// Create a cache whose entries never expire and which has no size bound
    pub fn unbounded() -> Self {
        Self {
            entries: HashMap::new(),
            expiry: Expiry::Never,
            max_entries: None,
        }
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    /// Look up a live entry, evicting it if it has expired
    pub fn get(&mut self, key: &K, now: Instant) -> Option<&V> {
        let expired = match self.entries.get(key) {
            Some(entry) => self.is_expired(entry, now),
            None => return None,
        };

        if expired {
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Insert or replace an entry, stamping it with `now`
    pub fn insert(&mut self, key: K, value: V, now: Instant) {
        if let Some(max) = self.max_entries {
            if !self.entries.contains_key(&key) && self.entries.len() >= max {
                self.make_room(max, now);
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Return the cached value for `key`, computing and storing it on a miss
    pub fn get_or_insert_with<F>(&mut self, key: K, now: Instant, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key, now) {
            return value.clone();
        }

        let value = compute();
        self.insert(key, value.clone(), now);
        value
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with) but a failed
    /// computation is returned to the caller and nothing is cached
    pub fn get_or_try_insert_with<F, E>(&mut self, key: K, now: Instant, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key, now) {
            return Ok(value.clone());
        }

        let value = compute()?;
        self.insert(key, value.clone(), now);
        Ok(value)
    }

    /// Number of stored entries, including ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        match self.expiry {
            Expiry::Never => false,
            Expiry::After(ttl) => now.saturating_duration_since(entry.inserted_at) > ttl,
        }
    }

    fn make_room(&mut self, max: usize, now: Instant) {
        if let Expiry::After(ttl) = self.expiry {
            self.entries
                .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) <= ttl);
        }

        while self.entries.len() >= max {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
