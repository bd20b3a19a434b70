//! Signed-in identity for storefront consumers.
//!
//! [`PollingCoordinator`] keeps the identity in a [`crate::cache::TtlCache`]
//! and refreshes it in the background from a shared timer, provider events
//! and host environment signals. Each UI consumer mounts an
//! [`AuthConsumer`] and renders from its [`AuthSnapshot`].

mod config;
mod consumer;
mod coordinator;
pub mod provider;
mod types;

pub use config::AuthConfig;
pub use consumer::AuthConsumer;
pub use coordinator::{AUTH_USER_KEY, PollingCoordinator};
pub use provider::{IdentityProvider, ProfileStore, ProviderError, with_timeout};
pub use types::{
    AuthEvent, AuthSnapshot, AuthUser, EnvironmentSignal, Profile, ProfileRole, Session, User,
};
