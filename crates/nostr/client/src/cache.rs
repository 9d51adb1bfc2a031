//! Query result cache.
//!
//! Caches the event a relay returned for a filter, keyed by relay URL and the
//! filter's JSON. Entries expire after a TTL and can be invalidated explicitly.
//! A cache is an ordinary value: construct one per process or per request and
//! pass it to [`QueryCoordinator::with_cache`](crate::QueryCoordinator::with_cache).

use crate::message::Filter;
use nostr_core::{Event, canonical_relay_url};
use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Configuration for the query cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry stays fresh
    pub ttl: Duration,
    /// Maximum number of entries
    pub max_entries: usize,
    /// Whether to enable caching
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1000,
            enabled: true,
        }
    }
}

/// Cache key: canonical relay URL plus filter JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub relay_url: String,
    pub filter: String,
}

impl CacheKey {
    pub fn new(relay_url: &str, filter: &Filter) -> Self {
        Self {
            relay_url: canonical_relay_url(relay_url),
            // Filter serialization cannot fail: all fields are strings and numbers.
            filter: filter.to_json().unwrap_or_default(),
        }
    }
}

struct Entry {
    event: Event,
    inserted_at: Instant,
}

#[derive(Default)]
struct Entries {
    map: HashMap<CacheKey, Entry>,
    /// Insertion order, oldest first
    order: VecDeque<CacheKey>,
}

/// TTL cache of single-event query results.
pub struct QueryCache {
    config: CacheConfig,
    entries: RwLock<Entries>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_config(CacheConfig {
            ttl,
            ..CacheConfig::default()
        })
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(Entries::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh cached event for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<Event> {
        if !self.config.enabled {
            return None;
        }

        {
            let entries = self.read();
            match entries.map.get(key) {
                Some(entry) if entry.inserted_at.elapsed() < self.config.ttl => {
                    return Some(entry.event.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired
        self.invalidate(key);
        None
    }

    pub fn insert(&self, key: CacheKey, event: Event) {
        if !self.config.enabled || self.config.max_entries == 0 {
            return;
        }

        let mut entries = self.write();
        if entries.map.contains_key(&key) {
            entries.order.retain(|k| k != &key);
        } else if entries.map.len() >= self.config.max_entries
            && let Some(oldest) = entries.order.pop_front()
        {
            entries.map.remove(&oldest);
        }

        entries.order.push_back(key.clone());
        entries.map.insert(
            key,
            Entry {
                event,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = self.write();
        entries.order.retain(|k| k != key);
        entries.map.remove(key).is_some()
    }

    /// Drop every entry for a relay.
    pub fn invalidate_relay(&self, relay_url: &str) {
        let relay_url = canonical_relay_url(relay_url);
        let mut entries = self.write();
        entries.map.retain(|k, _| k.relay_url != relay_url);
        entries.order.retain(|k| k.relay_url != relay_url);
    }

    pub fn invalidate_all(&self) {
        let mut entries = self.write();
        entries.map.clear();
        entries.order.clear();
    }

    pub fn len(&self) -> usize {
        self.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
