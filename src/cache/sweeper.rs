//! Periodic sweep of expired entries.
//!
//! Reads already evict expired entries lazily; the sweeper bounds memory for
//! keys that are never read again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use super::config::CacheConfig;
use super::store::TtlCache;

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

/// Owns the sweep task; the task stops when the handle is shut down or dropped.
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a task that calls [`TtlCache::cleanup`] every `cleanup_interval`.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_sweeper<T>(cache: Arc<TtlCache<T>>, config: &CacheConfig) -> SweeperHandle
where
    T: Clone + Send + Sync + 'static,
{
    let period = config.cleanup_interval.max(MIN_SWEEP_PERIOD);
    info!(period_secs = period.as_secs(), "Starting cache sweeper");

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            ticker.tick().await;
            let removed = cache.cleanup();
            debug!(removed, remaining = cache.len(), "Cache sweep finished");
        }
    });

    SweeperHandle { task }
}
