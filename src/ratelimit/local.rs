//! In-process counter store.
//!
//! Counters live in a `DashMap`, one entry per key. The entry lock taken by
//! `DashMap::entry` makes same-key increments mutually exclusive while keys on
//! other shards proceed in parallel.
//!
//! Entries expire lazily: an increment that finds an expired entry replaces
//! it with a fresh window. `prune_expired` reclaims entries that are never
//! touched again; `AppState` runs it on a background interval.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::RateLimitKey;
use super::store::{Increment, RateLimitStore, StoreError};

/// Counter for one key inside its current window.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

impl CounterEntry {
    fn open(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            expires_at: now + window,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded in-process counter store with per-entry expiry.
pub struct LocalStore {
    entries: DashMap<RateLimitKey, CounterEntry>,
    max_keys: usize,
}

impl LocalStore {
    /// Create a store tracking at most `max_keys` live keys.
    ///
    /// The bound is soft under contention: tasks inserting distinct new keys
    /// at the same moment may overshoot it by the number of racing tasks.
    pub fn new(max_keys: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_keys: max_keys.max(1),
        }
    }

    /// Number of keys currently held (expired ones included until pruned).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Pruned expired rate limit counters");
        }
        removed
    }

    fn ensure_capacity(&self, key: &RateLimitKey) -> Result<(), StoreError> {
        if self.entries.contains_key(key) || self.entries.len() < self.max_keys {
            return Ok(());
        }

        self.prune_expired();

        if self.entries.len() >= self.max_keys {
            warn!(max_keys = self.max_keys, "Local rate limit store is full");
            return Err(StoreError::Capacity(self.max_keys));
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for LocalStore {
    async fn increment(
        &self,
        key: &RateLimitKey,
        window: Duration,
    ) -> Result<Increment, StoreError> {
        self.ensure_capacity(key)?;

        let now = Instant::now();
        let mut is_new_window = false;

        // The entry guard holds the shard lock until it is dropped
        let mut entry = self.entries.entry(key.clone()).or_insert_with(|| {
            is_new_window = true;
            CounterEntry::open(now, window)
        });

        if !is_new_window {
            if entry.is_expired(now) {
                *entry = CounterEntry::open(now, window);
                is_new_window = true;
            } else {
                entry.count += 1;
            }
        }

        Ok(Increment {
            count: entry.count,
            is_new_window,
            resets_in: Some(entry.expires_at.saturating_duration_since(now)),
        })
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
