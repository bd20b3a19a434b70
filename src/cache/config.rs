//! Cache configuration.
//!
//! Controls the background sweep of the session cache via `dokan.toml`.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Cache configuration from `dokan.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How often expired entries are swept, independent of reads.
    #[serde(with = "seconds")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            cleanup_interval: settings.cleanup_interval,
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
