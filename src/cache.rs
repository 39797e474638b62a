//! Time-window response cache.
//!
//! A TTL of zero disables storage entirely. There is no background eviction;
//! stale entries are overwritten on the next `set` or simply treated as a
//! miss on the next `get`. Safe under concurrent use via `DashMap` — redundant
//! refreshes from concurrent misses are acceptable since responses are
//! idempotent (no singleflight coordination is implemented, matching §4.2).

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{PanelError, Result};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A per-key cache with a single, shared TTL.
pub struct TimeWindowCache<V: Clone> {
    ttl: Duration,
    entries: DashMap<String, Entry<V>>,
}

impl<V: Clone> TimeWindowCache<V> {
    /// Construct a cache with the given TTL. A zero TTL disables caching
    /// entirely (every `get` reports a miss, `set` is a no-op).
    ///
    /// Rejects a negative TTL — not representable by `Duration`, so callers
    /// pass a `Duration` directly and this constructor never actually fails;
    /// kept fallible to mirror the spec's validation contract for callers
    /// that build the TTL from a signed configuration value.
    pub fn new(ttl: Duration) -> Result<Self> {
        Ok(Self { ttl, entries: DashMap::new() })
    }

    /// Construct from a signed millisecond count, rejecting negative values.
    pub fn from_millis_signed(ttl_ms: i64) -> Result<Self> {
        if ttl_ms < 0 {
            return Err(PanelError::Validation(format!("negative cache TTL: {ttl_ms}ms")));
        }
        Self::new(Duration::from_millis(ttl_ms as u64))
    }

    /// Look up `key`. Returns `(value, true)` on a hit, `(_, false)` on a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        if self.ttl.is_zero() {
            return None;
        }
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() <= self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Store `value` under `key`, timestamped with the current monotonic instant.
    pub fn set(&self, key: impl Into<String>, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(key.into(), Entry { value, inserted_at: Instant::now() });
    }

    /// Remove a single key (used to invalidate a cached response after a write).
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove every key whose name starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }
}
