//! Stale-while-revalidate storage.
//!
//! Entries are served until their stale window passes; between the fresh and
//! stale horizons they are returned together with a hint that a background
//! refresh is due.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::entry::{CacheEntry, Freshness};
use super::lock::{read_guard, write_guard};

const SOURCE: &str = "cache::store";

const METRIC_HIT_TOTAL: &str = "dokan_ttl_cache_hit_total";
const METRIC_MISS_TOTAL: &str = "dokan_ttl_cache_miss_total";
const METRIC_EXPIRED_TOTAL: &str = "dokan_ttl_cache_expired_total";

/// Result of a status-aware read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus<T> {
    pub data: Option<T>,
    pub is_stale: bool,
    pub needs_revalidation: bool,
}

impl<T> CacheStatus<T> {
    fn miss() -> Self {
        Self {
            data: None,
            is_stale: false,
            needs_revalidation: true,
        }
    }
}

/// Diagnostic view of the cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    /// Live keys, sorted.
    pub keys: Vec<String>,
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    revalidating: HashSet<String>,
}

/// In-memory key/value cache with per-entry fresh and stale windows.
///
/// Entries and revalidation marks share one lock so that
/// [`TtlCache::try_begin_revalidation`] can check and mark atomically.
pub struct TtlCache<T> {
    state: RwLock<CacheState<T>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                revalidating: HashSet::new(),
            }),
        }
    }

    /// Store `data`, replacing any previous entry. The stale window is twice
    /// the fresh window.
    pub fn set(&self, key: impl Into<String>, data: T, fresh: Duration) {
        self.insert(key.into(), CacheEntry::new(data, fresh, None));
    }

    /// Store `data` with an explicit stale window.
    pub fn set_with_stale(&self, key: impl Into<String>, data: T, fresh: Duration, stale: Duration) {
        self.insert(key.into(), CacheEntry::new(data, fresh, Some(stale)));
    }

    fn insert(&self, key: String, entry: CacheEntry<T>) {
        trace!(
            key = %key,
            fresh_ms = duration_ms(entry.fresh_window()),
            stale_ms = duration_ms(entry.stale_window()),
            "Cache entry written"
        );
        write_guard(&self.state, SOURCE, "insert")
            .entries
            .insert(key, entry);
    }

    /// Return the value while it is within its stale window.
    ///
    /// Expired entries are removed as a side effect. A revalidation mark on the
    /// key stays until its owner clears it.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut state = write_guard(&self.state, SOURCE, "get");
        match state.entries.get(key).map(|entry| entry.freshness(now)) {
            None => {
                counter!(METRIC_MISS_TOTAL).increment(1);
                None
            }
            Some(Freshness::Expired) => {
                state.entries.remove(key);
                record_expired(key, 1);
                counter!(METRIC_MISS_TOTAL).increment(1);
                None
            }
            Some(freshness) => {
                record_hit(freshness);
                state.entries.get(key).map(|entry| entry.data().clone())
            }
        }
    }

    /// Return the value along with whether it is stale and whether the
    /// caller should start a refresh.
    pub fn get_with_status(&self, key: &str) -> CacheStatus<T> {
        let now = Instant::now();
        let mut state = write_guard(&self.state, SOURCE, "get_with_status");
        let freshness = match state.entries.get(key) {
            Some(entry) => entry.freshness(now),
            None => {
                counter!(METRIC_MISS_TOTAL).increment(1);
                return CacheStatus::miss();
            }
        };

        match freshness {
            Freshness::Expired => {
                state.entries.remove(key);
                record_expired(key, 1);
                counter!(METRIC_MISS_TOTAL).increment(1);
                CacheStatus::miss()
            }
            Freshness::Fresh => {
                record_hit(freshness);
                CacheStatus {
                    data: state.entries.get(key).map(|entry| entry.data().clone()),
                    is_stale: false,
                    needs_revalidation: false,
                }
            }
            Freshness::Stale => {
                record_hit(freshness);
                CacheStatus {
                    data: state.entries.get(key).map(|entry| entry.data().clone()),
                    is_stale: true,
                    needs_revalidation: !state.revalidating.contains(key),
                }
            }
        }
    }

    /// True iff [`TtlCache::get`] would return a value.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = write_guard(&self.state, SOURCE, "has");
        match state.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                state.entries.remove(key);
                record_expired(key, 1);
                false
            }
            None => false,
        }
    }

    pub fn mark_revalidating(&self, key: &str) {
        write_guard(&self.state, SOURCE, "mark_revalidating")
            .revalidating
            .insert(key.to_string());
    }

    pub fn clear_revalidating(&self, key: &str) {
        write_guard(&self.state, SOURCE, "clear_revalidating")
            .revalidating
            .remove(key);
    }

    pub fn is_revalidating(&self, key: &str) -> bool {
        read_guard(&self.state, SOURCE, "is_revalidating")
            .revalidating
            .contains(key)
    }

    /// Atomically decide whether the caller owns the next refresh of `key`.
    ///
    /// Returns true, and marks the key, when the entry is missing, expired or
    /// stale and no refresh is already marked. Fresh entries never need one.
    pub fn try_begin_revalidation(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = write_guard(&self.state, SOURCE, "try_begin_revalidation");
        let fresh = state
            .entries
            .get(key)
            .is_some_and(|entry| entry.freshness(now) == Freshness::Fresh);
        if fresh || state.revalidating.contains(key) {
            return false;
        }
        state.revalidating.insert(key.to_string());
        true
    }

    /// Remove one entry and its revalidation mark.
    pub fn delete(&self, key: &str) {
        let mut state = write_guard(&self.state, SOURCE, "delete");
        state.entries.remove(key);
        state.revalidating.remove(key);
    }

    /// Remove every entry and every revalidation mark.
    pub fn clear(&self) {
        let mut state = write_guard(&self.state, SOURCE, "clear");
        state.entries.clear();
        state.revalidating.clear();
    }

    /// Drop every entry past its stale window. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut state = write_guard(&self.state, SOURCE, "cleanup");
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        if removed > 0 {
            counter!(METRIC_EXPIRED_TOTAL).increment(removed as u64);
            debug!(removed, remaining = state.entries.len(), "Swept expired cache entries");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = read_guard(&self.state, SOURCE, "stats");
        let mut keys: Vec<String> = state.entries.keys().cloned().collect();
        keys.sort();
        CacheStats {
            size: state.entries.len(),
            keys,
        }
    }

    pub fn len(&self) -> usize {
        read_guard(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn record_hit(freshness: Freshness) {
    let state = match freshness {
        Freshness::Fresh => "fresh",
        _ => "stale",
    };
    counter!(METRIC_HIT_TOTAL, "state" => state).increment(1);
}

fn record_expired(key: &str, count: u64) {
    debug!(key, "Cache entry expired");
    counter!(METRIC_EXPIRED_TOTAL).increment(count);
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
