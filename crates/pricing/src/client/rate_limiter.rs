//! Per-source request throttling.
//!
//! Enforces a minimum interval between consecutive requests to the same
//! source. Each source gets its own slot behind its own lock, so throttling
//! one source never serializes callers of another. The outer map lock is
//! held only long enough to hand out a slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::models::SourceId;

/// Default minimum interval for sources without explicit configuration.
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Rate limit configuration for a single source.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Minimum delay between two consecutive requests to the source.
    pub min_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

/// Last-request bookkeeping for a single source.
///
/// Mutated only inside the slot's critical section.
#[derive(Debug)]
struct Slot {
    last_request_at: Option<Instant>,
    min_interval: Duration,
}

impl Slot {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request_at: None,
            min_interval,
        }
    }
}

/// Point-in-time snapshot of limiter counters.
///
/// Counters are monotonic and backed by atomics, so taking a snapshot never
/// blocks writers.
#[derive(Clone, Copy, Debug, Default)]
pub struct RateLimiterMetrics {
    /// Total `acquire` calls across all sources.
    pub total_acquires: u64,
    /// How many acquires had to sleep at least once.
    pub total_sleeps: u64,
    /// Cumulative time spent sleeping.
    pub total_slept: Duration,
}

/// Minimum-interval rate limiter for multiple sources.
///
/// Thread-safe: for any source, two wrapped fetches are never initiated
/// closer together than that source's `min_interval`, even under concurrent
/// callers. A caller that enters [`acquire`](Self::acquire) commits to the
/// wait - callers needing cancellation must race `acquire` against their own
/// timeout and abandon the result.
pub struct RateLimiter {
    /// Per-source slots. The outer lock is held for O(map op) only.
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
    /// Per-source configuration overrides.
    configs: Mutex<HashMap<String, RateLimitConfig>>,
    total_acquires: AtomicU64,
    total_sleeps: AtomicU64,
    total_slept_micros: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter with default settings.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            configs: Mutex::new(HashMap::new()),
            total_acquires: AtomicU64::new(0),
            total_sleeps: AtomicU64::new(0),
            total_slept_micros: AtomicU64::new(0),
        }
    }

    /// Lock the slots map, recovering from poison if necessary.
    ///
    /// It's safe to recover here since the worst case is slightly incorrect
    /// throttling, which is better than panicking.
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<Slot>>>> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter slots mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Lock the configs map, recovering from poison if necessary.
    fn lock_configs(&self) -> MutexGuard<'_, HashMap<String, RateLimitConfig>> {
        self.configs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter configs mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Lock a source's slot, recovering from poison if necessary.
    fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
        slot.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter slot mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure the rate limit for a specific source.
    ///
    /// Resets the source's slot, so the next request is admitted immediately.
    pub fn configure(&self, source: &SourceId, config: RateLimitConfig) {
        let mut configs = self.lock_configs();
        configs.insert(source.to_string(), config);
        drop(configs); // Release configs lock before acquiring slots lock

        let mut slots = self.lock_slots();
        slots.remove(source.as_ref());
    }

    /// Wait until a request to the given source is admissible.
    ///
    /// Blocks (asynchronously) until at least `min_interval` has passed since
    /// the previous admitted request for this source, then records the new
    /// request time. Waiters for other sources are unaffected.
    pub async fn acquire(&self, source: &SourceId) {
        let slot = self.slot(source);
        self.total_acquires.fetch_add(1, Ordering::Relaxed);

        let mut slept = false;
        loop {
            let wait = {
                let mut slot = Self::lock_slot(&slot);
                let now = Instant::now();
                match slot.last_request_at {
                    Some(last) => {
                        let wait = slot.min_interval.saturating_sub(now.duration_since(last));
                        if wait.is_zero() {
                            slot.last_request_at = Some(now);
                            None
                        } else {
                            Some(wait)
                        }
                    }
                    None => {
                        slot.last_request_at = Some(now);
                        None
                    }
                }
            };

            let Some(wait) = wait else {
                return;
            };

            if !slept {
                slept = true;
                self.total_sleeps.fetch_add(1, Ordering::Relaxed);
            }
            self.total_slept_micros
                .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);

            debug!("Rate limiter: waiting {:?} for source '{}'", wait, source);
            tokio::time::sleep(wait).await;
        }
    }

    /// Snapshot the limiter counters without blocking writers.
    pub fn metrics(&self) -> RateLimiterMetrics {
        RateLimiterMetrics {
            total_acquires: self.total_acquires.load(Ordering::Relaxed),
            total_sleeps: self.total_sleeps.load(Ordering::Relaxed),
            total_slept: Duration::from_micros(self.total_slept_micros.load(Ordering::Relaxed)),
        }
    }

    /// Get or create the slot for a source, using custom config if available.
    fn slot(&self, source: &SourceId) -> Arc<Mutex<Slot>> {
        let mut slots = self.lock_slots();
        if let Some(slot) = slots.get(source.as_ref()) {
            return Arc::clone(slot);
        }

        let min_interval = {
            let configs = self.lock_configs();
            configs
                .get(source.as_ref())
                .map(|c| c.min_interval)
                .unwrap_or(DEFAULT_MIN_INTERVAL)
        };

        let slot = Arc::new(Mutex::new(Slot::new(min_interval)));
        slots.insert(source.to_string(), Arc::clone(&slot));
        slot
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
