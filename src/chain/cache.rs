//! TTL cache behind an explicit port
//!
//! Reads go straight to the concurrent map. Writes, evictions and pruning
//! are serialized by a single lock. A read that finds an expired entry
//! removes it, and the map never holds more than its capacity.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::metrics::metrics;

/// Identity of a cached read: method, arguments and block reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: &'static str,
    args: Vec<String>,
    block: String,
}

impl CacheKey {
    pub fn new(method: &'static str, args: &[&str], block: &str) -> Self {
        Self {
            method,
            args: args.iter().map(|a| a.to_string()).collect(),
            block: block.to_string(),
        }
    }

    pub fn method(&self) -> &str {
        self.method
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})@{}", self.method, self.args.join(","), self.block)
    }
}

pub trait CachePort: Send + Sync {
    /// Live value for `key`, if any
    fn get(&self, key: &CacheKey) -> Option<Value>;

    fn put(&self, key: CacheKey, value: Value, ttl: Duration);

    fn invalidate(&self, key: &CacheKey);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Entries kept before the soonest-expiring ones are evicted
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct TtlCache {
    entries: DashMap<CacheKey, CacheEntry>,
    write_lock: Mutex<()>,
    capacity: usize,
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            write_lock: Mutex::new(()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, expired ones included until read or pruned
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries
    pub fn prune_expired(&self) -> usize {
        let _guard = self.write_lock.lock();
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - self.entries.len();
        metrics().cache_entries.set(self.entries.len() as i64);
        removed
    }

    /// Make room for one more entry; caller holds the write lock
    fn make_room(&self, now: Instant) {
        if self.entries.len() < self.capacity {
            return;
        }
        self.entries.retain(|_, entry| entry.expires_at > now);
        while self.entries.len() >= self.capacity {
            let soonest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());
            match soonest {
                Some(key) => {
                    self.entries.remove(&key);
                    metrics().cache_evictions.inc();
                }
                None => break,
            }
        }
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.clear();
        metrics().cache_entries.set(0);
    }
}

impl CachePort for TtlCache {
    fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }

        let _guard = self.write_lock.lock();
        // A concurrent put may have refreshed the entry meanwhile
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        metrics().cache_entries.set(self.entries.len() as i64);
        None
    }

    fn put(&self, key: CacheKey, value: Value, ttl: Duration) {
        let _guard = self.write_lock.lock();
        let now = Instant::now();
        if !self.entries.contains_key(&key) {
            self.make_room(now);
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        metrics().cache_entries.set(self.entries.len() as i64);
    }

    fn invalidate(&self, key: &CacheKey) {
        let _guard = self.write_lock.lock();
        self.entries.remove(key);
        metrics().cache_entries.set(self.entries.len() as i64);
    }
}
