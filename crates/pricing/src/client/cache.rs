//! TTL- and size-bounded response cache with stampede protection.
//!
//! Caches per-item fetch outcomes so repeated lookups don't re-hit the
//! sources. Expired entries are never returned; once the cache is full, the
//! least-recently-accessed entry is evicted. A cached `None` records that a
//! source had no data for the key - re-fetching known absence would defeat
//! the load bound.
//!
//! Critical sections contain only map operations. Hit/miss counters are
//! atomics, [`stats`](ResponseCache::stats) takes the map lock only to read
//! the size, and nothing is ever logged while a lock is held - so stats can
//! safely be read from diagnostic logging anywhere, including mid-insert on
//! another thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::models::SourceQuote;

/// A cached fetch outcome. `None` is a cached negative result: the source
/// answered and had no data for the item.
pub type CachedQuote = Option<SourceQuote>;

/// Default time-to-live for cached outcomes.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default entry cap.
const DEFAULT_MAX_SIZE: usize = 1024;

/// Cache configuration for a single source client.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long an entry stays servable after insertion.
    pub ttl: Duration,
    /// Maximum number of entries before least-recently-accessed eviction.
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: CachedQuote,
    inserted_at: Instant,
    last_accessed: Instant,
    ttl: Duration,
}

impl Entry {
    fn new(value: CachedQuote, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            last_accessed: now,
            ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

/// Point-in-time cache statistics.
#[derive(Clone, Copy, Debug)]
pub struct CacheStats {
    /// Reads served from a live entry.
    pub hits: u64,
    /// Reads that found nothing, or only an expired entry.
    pub misses: u64,
    /// Current number of entries.
    pub size: usize,
    /// `hits / (hits + misses)`, 0 when nothing was read yet.
    pub hit_ratio: f64,
    /// `size / max_size`.
    pub fill_ratio: f64,
}

/// In-memory response cache shared by all callers of one source client.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, Entry>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create a cache with default TTL and size.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with custom configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Lock the entry map, recovering from poison if necessary.
    ///
    /// Losing cached data to a poisoned lock only costs extra fetches, which
    /// is better than panicking.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Response cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Look up a key.
    ///
    /// Returns `None` on a miss, `Some(outcome)` on a hit - where the outcome
    /// itself may be a cached "source had no data". An expired entry counts
    /// as a miss and is dropped on the spot. Hits refresh the entry's
    /// recency.
    pub fn get(&self, key: &str) -> Option<CachedQuote> {
        let result = {
            let mut entries = self.lock_entries();
            let now = Instant::now();
            match entries.get_mut(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.last_accessed = now;
                    Some(entry.value.clone())
                }
                Some(_) => {
                    entries.remove(key);
                    None
                }
                None => None,
            }
        };

        match result {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Insert an outcome under the configured TTL.
    pub fn set(&self, key: &str, value: CachedQuote) {
        self.set_with_ttl(key, value, self.config.ttl);
    }

    /// Insert an outcome with an explicit TTL.
    ///
    /// If the cache is full and the key is new, the least-recently-accessed
    /// entry is evicted first.
    pub fn set_with_ttl(&self, key: &str, value: CachedQuote, ttl: Duration) {
        let evicted = {
            let mut entries = self.lock_entries();
            let evicted = if !entries.contains_key(key) && entries.len() >= self.config.max_size {
                Self::evict_lru(&mut entries)
            } else {
                None
            };
            entries.insert(key.to_string(), Entry::new(value, ttl));
            evicted
        };

        if let Some(evicted) = evicted {
            debug!("Response cache: evicted '{}' (least recently used)", evicted);
        }
    }

    /// Publish a freshly fetched outcome, single-flight style.
    ///
    /// The expensive fetch happens outside any lock; this re-checks the cache
    /// under a short lock before committing. If another caller published a
    /// live entry for the key first, the redundant result is discarded and
    /// the incumbent returned - so concurrent callers that raced the same
    /// fetch all converge on one value.
    pub fn publish(&self, key: &str, value: CachedQuote) -> CachedQuote {
        let (result, evicted) = {
            let mut entries = self.lock_entries();
            let now = Instant::now();
            if let Some(entry) = entries.get_mut(key) {
                if !entry.is_expired(now) {
                    entry.last_accessed = now;
                    return entry.value.clone();
                }
                entries.remove(key);
            }

            let evicted = if entries.len() >= self.config.max_size {
                Self::evict_lru(&mut entries)
            } else {
                None
            };
            entries.insert(key.to_string(), Entry::new(value.clone(), self.config.ttl));
            (value, evicted)
        };

        if let Some(evicted) = evicted {
            debug!("Response cache: evicted '{}' (least recently used)", evicted);
        }
        result
    }

    /// Snapshot the cache statistics.
    ///
    /// Counter reads are lock-free; the map lock is held only to read the
    /// entry count.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let size = self.lock_entries().len();

        let reads = hits + misses;
        CacheStats {
            hits,
            misses,
            size,
            hit_ratio: if reads == 0 {
                0.0
            } else {
                hits as f64 / reads as f64
            },
            fill_ratio: if self.config.max_size == 0 {
                0.0
            } else {
                size as f64 / self.config.max_size as f64
            },
        }
    }

    /// Remove the least-recently-accessed entry, returning its key.
    fn evict_lru(entries: &mut HashMap<String, Entry>) -> Option<String> {
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone())?;
        entries.remove(&victim);
        Some(victim)
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
