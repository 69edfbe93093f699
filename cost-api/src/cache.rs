// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! In-memory expiring key/value store.
//!
//! [`TtlCache`] backs both the credential cache and the per-account result
//! caches. Every entry carries an absolute expiration instant that is fixed
//! when the entry is written; reads past that instant behave as misses even if
//! the background janitor has not swept the entry yet.
//!
//! Expiration is measured with [`tokio::time::Instant`] so that tests can drive
//! the clock with `tokio::time::pause` and `tokio::time::advance`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::{Instant, MissedTickBehavior};

/// Time-to-live requested for a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The cache-wide default, resolved at insertion time.
    Default,
    /// The entry never expires.
    Never,
    /// The entry expires after the given duration.
    After(Duration),
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

struct Inner<V> {
    default_ttl: Duration,
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V> Inner<V> {
    fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

/// Thread-safe cache of `V` values keyed by string.
///
/// Cloning a `TtlCache` is cheap and yields a handle to the same storage.
pub struct TtlCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("default_ttl", &self.inner.default_ttl)
            .field("entries", &self.inner.entries.read().len())
            .finish()
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache without a background janitor. Expired entries are
    /// invisible to readers but stay in memory until [`purge_expired`] runs.
    ///
    /// [`purge_expired`]: TtlCache::purge_expired
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                default_ttl,
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Creates a cache and spawns a janitor task that evicts expired entries
    /// every `purge_interval`. The task stops once every handle to the cache
    /// has been dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_janitor(default_ttl: Duration, purge_interval: Duration) -> Self {
        let cache = Self::new(default_ttl);
        if !purge_interval.is_zero() {
            cache.spawn_janitor(purge_interval);
        }
        cache
    }

    fn spawn_janitor(&self, purge_interval: Duration) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + purge_interval, purge_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let purged = inner.purge_expired(Instant::now());
                if purged > 0 {
                    tracing::debug!("[cost-api] purged {} expired cache entries", purged);
                }
            }
        });
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Inserts or overwrites `key`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Ttl) {
        let expires_at = match ttl {
            Ttl::Default => Some(Instant::now() + self.inner.default_ttl),
            Ttl::Never => None,
            Ttl::After(duration) => Some(Instant::now() + duration),
        };
        self.inner
            .entries
            .write()
            .insert(key.into(), Entry { value, expires_at });
    }

    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, Ttl::Default);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_with_expiration(key).map(|(value, _)| value)
    }

    /// Returns the value together with its absolute expiration instant
    /// (`None` for entries that never expire).
    pub fn get_with_expiration(&self, key: &str) -> Option<(V, Option<Instant>)> {
        let entries = self.inner.entries.read();
        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some((entry.value.clone(), entry.expires_at))
    }

    pub fn delete(&self, key: &str) -> Option<V> {
        self.inner
            .entries
            .write()
            .remove(key)
            .map(|entry| entry.value)
    }

    /// Evicts every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired(Instant::now())
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
