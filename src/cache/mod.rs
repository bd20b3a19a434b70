//! Dokan session cache.
//!
//! A stale-while-revalidate key/value store. Every entry carries two
//! horizons measured from the moment it was written:
//!
//! - **fresh window**: the value is authoritative;
//! - **stale window**: the value is still served, flagged for a background
//!   refresh; past it the entry is evicted.
//!
//! ## Configuration
//!
//! The periodic sweep is controlled via `dokan.toml`:
//!
//! ```toml
//! [cache]
//! cleanup_interval_seconds = 300
//! ```

mod config;
mod entry;
pub(crate) mod lock;
mod store;
mod sweeper;

pub use config::CacheConfig;
pub use entry::{CacheEntry, Freshness};
pub use store::{CacheStats, CacheStatus, TtlCache};
pub use sweeper::{SweeperHandle, spawn_sweeper};
