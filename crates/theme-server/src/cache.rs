//! Reference-counted resource cache.
//!
//! An entry is created by the first successful lookup with one reference,
//! gains a reference per repeated lookup and loses one per unload. When the
//! count reaches zero the payload is handed back to the caller for freeing,
//! unless retention of unused entries is switched on, in which case the entry
//! stays cached until [`RefCountedCache::clean`] or until retention is
//! switched off again.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::warn;

/// Counters served over the diagnostics protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Reference count of the entry touched by the last lookup or insert.
    pub last_added_refcount: u32,
    /// Reference count left on the entry touched by the last release.
    pub last_removed_refcount: u32,
}

/// Outcome of dropping one reference.
#[derive(Debug, PartialEq)]
pub enum Released<V> {
    /// Other references remain.
    Held(u32),
    /// No references remain; the entry is retained for reuse.
    Unused,
    /// No references remain; the payload must be freed by the caller.
    Reclaimed(V),
    /// No such entry, or it had no references to drop.
    Underflow,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    refs: u32,
}

#[derive(Debug)]
pub struct RefCountedCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    retain_unused: bool,
    stats: CacheStats,
}

impl<K, V> Default for RefCountedCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            retain_unused: false,
            stats: CacheStats::default(),
        }
    }
}

impl<K, V> RefCountedCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Copy,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on a cached entry. Counts a hit or a miss.
    pub fn acquire(&mut self, key: &K) -> Option<V> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.refs += 1;
                self.stats.hits += 1;
                self.stats.last_added_refcount = entry.refs;
                Some(entry.value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a freshly produced entry holding one reference.
    ///
    /// Returns the payload it displaced, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.stats.last_added_refcount = 1;
        self.entries
            .insert(key, Entry { value, refs: 1 })
            .map(|old| old.value)
    }

    /// Add a reference without counting a lookup.
    pub fn add_ref(&mut self, key: &K) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.refs += 1;
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, key: &K) -> Released<V> {
        let Some(entry) = self.entries.get_mut(key) else {
            warn!(?key, "Release of unknown cache entry");
            return Released::Underflow;
        };
        if entry.refs == 0 {
            warn!(?key, "Reference count underflow");
            return Released::Underflow;
        }

        entry.refs -= 1;
        self.stats.last_removed_refcount = entry.refs;
        if entry.refs > 0 {
            return Released::Held(entry.refs);
        }
        if self.retain_unused {
            return Released::Unused;
        }
        match self.entries.remove(key) {
            Some(entry) => Released::Reclaimed(entry.value),
            None => Released::Underflow,
        }
    }

    /// Drop an entry regardless of its references.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn refcount(&self, key: &K) -> Option<u32> {
        self.entries.get(key).map(|entry| entry.refs)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys matching a predicate.
    pub fn keys_where(&self, mut pred: impl FnMut(&K) -> bool) -> Vec<K> {
        self.entries.keys().filter(|k| pred(k)).cloned().collect()
    }

    pub fn retains_unused(&self) -> bool {
        self.retain_unused
    }

    /// Switch retention of unused entries. Switching it off reclaims every
    /// unused entry.
    pub fn set_retain_unused(&mut self, retain: bool) -> Vec<V> {
        self.retain_unused = retain;
        if retain {
            Vec::new()
        } else {
            self.clean()
        }
    }

    /// Reclaim every entry without references.
    pub fn clean(&mut self) -> Vec<V> {
        let unused = self.keys_where_unused();
        unused.iter().filter_map(|key| self.remove(key)).collect()
    }

    fn keys_where_unused(&self) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.refs == 0)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove every entry, returning the payloads.
    pub fn drain(&mut self) -> Vec<V> {
        self.entries.drain().map(|(_, entry)| entry.value).collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
