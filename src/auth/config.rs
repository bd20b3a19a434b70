//! Auth polling configuration.

use std::time::Duration;

const DEFAULT_FRESH_WINDOW: Duration = Duration::from_secs(8);
const DEFAULT_STALE_WINDOW: Duration = Duration::from_secs(24);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(8);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_SIGNAL_DEBOUNCE: Duration = Duration::from_secs(5);

/// Timing policy for [`super::PollingCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// How long a fetched identity is served without revalidation.
    pub fresh_window: Duration,
    /// How long a fetched identity may be served at all.
    pub stale_window: Duration,
    /// Period of the shared polling timer.
    pub poll_interval: Duration,
    /// Upper bound on every identity/profile call.
    pub request_timeout: Duration,
    /// Background fetches closer together than this are skipped.
    pub min_refetch_interval: Duration,
    /// Visibility, focus and online signals share this debounce.
    pub signal_debounce: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            fresh_window: DEFAULT_FRESH_WINDOW,
            stale_window: DEFAULT_STALE_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            min_refetch_interval: DEFAULT_MIN_REFETCH_INTERVAL,
            signal_debounce: DEFAULT_SIGNAL_DEBOUNCE,
        }
    }
}

impl From<&crate::config::AuthSettings> for AuthConfig {
    fn from(settings: &crate::config::AuthSettings) -> Self {
        Self {
            fresh_window: settings.fresh_window,
            stale_window: settings.stale_window,
            poll_interval: settings.poll_interval,
            request_timeout: settings.request_timeout,
            min_refetch_interval: settings.min_refetch_interval,
            signal_debounce: settings.signal_debounce,
        }
    }
}
