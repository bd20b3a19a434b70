//! Cache entries with a fresh window and a stale window.

use std::time::Duration;

use tokio::time::Instant;

/// Where an entry sits on its lifetime at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within the fresh window; no refresh needed.
    Fresh,
    /// Past the fresh window but still servable.
    Stale,
    /// Past the stale window; must not be served.
    Expired,
}

/// A cached value together with the two horizons that govern it.
///
/// The stale window is measured from `written_at`, like the fresh window, and
/// is never shorter than the fresh window.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    data: T,
    written_at: Instant,
    fresh_window: Duration,
    stale_window: Duration,
}

impl<T> CacheEntry<T> {
    /// Create an entry written now.
    ///
    /// A missing stale window defaults to twice the fresh window; a stale
    /// window shorter than the fresh window is raised to match it.
    pub fn new(data: T, fresh_window: Duration, stale_window: Option<Duration>) -> Self {
        let stale_window = stale_window
            .unwrap_or_else(|| fresh_window.saturating_mul(2))
            .max(fresh_window);
        Self {
            data,
            written_at: Instant::now(),
            fresh_window,
            stale_window,
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn written_at(&self) -> Instant {
        self.written_at
    }

    pub fn fresh_window(&self) -> Duration {
        self.fresh_window
    }

    pub fn stale_window(&self) -> Duration {
        self.stale_window
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.written_at)
    }

    pub fn freshness(&self, now: Instant) -> Freshness {
        let age = self.age(now);
        if age <= self.fresh_window {
            Freshness::Fresh
        } else if age <= self.stale_window {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.freshness(now) == Freshness::Expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_window_defaults_to_double_fresh() {
        let entry = CacheEntry::new("x", Duration::from_secs(8), None);
        assert_eq!(entry.stale_window(), Duration::from_secs(16));
    }

    #[test]
    fn short_stale_window_is_clamped() {
        let entry = CacheEntry::new("x", Duration::from_secs(8), Some(Duration::from_secs(3)));
        assert_eq!(entry.stale_window(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn freshness_follows_the_clock() {
        let entry = CacheEntry::new(1, Duration::from_secs(8), Some(Duration::from_secs(24)));
        assert_eq!(entry.freshness(Instant::now()), Freshness::Fresh);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(entry.freshness(Instant::now()), Freshness::Stale);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(entry.freshness(Instant::now()), Freshness::Expired);
        assert!(entry.is_expired(Instant::now()));
    }
}
