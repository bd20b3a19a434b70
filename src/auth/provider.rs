//! Ports to the hosted identity platform.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use super::types::{AuthEvent, Profile, Session, User};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("identity provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode identity provider response: {0}")]
    Decode(String),
    #[error("invalid identity provider endpoint: {0}")]
    Endpoint(String),
}

impl ProviderError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    pub fn endpoint(err: impl std::fmt::Display) -> Self {
        Self::Endpoint(err.to_string())
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }
}

/// Session authority: who is signed in, and when that changes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>, ProviderError>;

    async fn get_user(&self) -> Result<Option<User>, ProviderError>;

    async fn refresh_session(&self) -> Result<Option<Session>, ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Stream of auth state changes. Each call returns an independent receiver.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Lookup of storefront profiles (`select * from profiles where id = ?`).
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile_by_id(&self, id: Uuid) -> Result<Option<Profile>, ProviderError>;
}

/// Race `future` against `limit`, substituting `fallback` when it loses.
///
/// Expiry is logged, never returned as an error.
pub async fn with_timeout<F, T>(limit: Duration, operation: &'static str, future: F, fallback: T) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(value) => value,
        Err(_) => {
            warn!(
                operation,
                timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                "Identity call timed out; using fallback"
            );
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timeout_substitutes_fallback() {
        let value = with_timeout(
            Duration::from_secs(3),
            "slow",
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                1
            },
            0,
        )
        .await;
        assert_eq!(value, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_call_wins_the_race() {
        let value = with_timeout(Duration::from_secs(3), "fast", async { 7 }, 0).await;
        assert_eq!(value, 7);
    }

    #[test]
    fn status_error_mentions_code() {
        let err = ProviderError::status(503, "maintenance");
        assert_eq!(
            err.to_string(),
            "identity provider returned status 503: maintenance"
        );
    }
}
