//! HTTP adapter for the hosted auth platform.
//!
//! Holds the current token pair in memory and speaks the platform's REST
//! dialect: `auth/v1/*` for sessions and `rest/v1/profiles` for profile rows.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{
    AuthEvent, IdentityProvider, Profile, ProfileStore, ProviderError, Session, User,
};
use crate::cache::lock::{read_guard, write_guard};
use crate::config::ProviderSettings;

use super::error::InfraError;

const SOURCE: &str = "infra::identity";
const EVENT_CAPACITY: usize = 16;
const USER_PATH: &str = "auth/v1/user";
const TOKEN_PATH: &str = "auth/v1/token";
const LOGOUT_PATH: &str = "auth/v1/logout";
const PROFILES_PATH: &str = "rest/v1/profiles";

#[derive(Debug, Clone)]
struct TokenPair {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now: OffsetDateTime) -> Session {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|seconds| now.unix_timestamp().saturating_add(seconds))
        });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Identity provider and profile store backed by the platform's HTTP API.
pub struct HttpIdentityProvider {
    client: Client,
    base: Url,
    anon_key: String,
    tokens: RwLock<Option<TokenPair>>,
    events: broadcast::Sender<AuthEvent>,
}

impl HttpIdentityProvider {
    pub fn new(base: &Url, anon_key: impl Into<String>, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            client,
            base: directory_url(base),
            anon_key: anon_key.into(),
            tokens: RwLock::new(None),
            events,
        })
    }

    /// Build from resolved settings, seeding any configured tokens.
    pub fn from_settings(settings: &ProviderSettings, timeout: Duration) -> Result<Self, InfraError> {
        let base = settings
            .url
            .as_ref()
            .ok_or_else(|| InfraError::configuration("provider.url is required"))?;
        let anon_key = settings
            .anon_key
            .as_deref()
            .ok_or_else(|| InfraError::configuration("provider.anon_key is required"))?;

        let provider = Self::new(base, anon_key, timeout)?;
        if let Some(access_token) = settings.access_token.as_ref() {
            provider.set_tokens(access_token.clone(), settings.refresh_token.clone());
        }
        Ok(provider)
    }

    pub fn user_agent() -> &'static str {
        concat!("dokan/", env!("CARGO_PKG_VERSION"))
    }

    /// Replace the in-memory token pair without contacting the platform.
    pub fn set_tokens(&self, access_token: String, refresh_token: Option<String>) {
        *write_guard(&self.tokens, SOURCE, "set_tokens") = Some(TokenPair {
            access_token,
            refresh_token,
            expires_at: None,
        });
    }

    pub fn has_session(&self) -> bool {
        read_guard(&self.tokens, SOURCE, "has_session").is_some()
    }

    fn tokens(&self) -> Option<TokenPair> {
        read_guard(&self.tokens, SOURCE, "tokens").clone()
    }

    fn take_tokens(&self) -> Option<TokenPair> {
        write_guard(&self.tokens, SOURCE, "take_tokens").take()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base.join(path).map_err(ProviderError::endpoint)
    }

    fn emit(&self, event: AuthEvent) {
        // No receivers simply means nothing is mounted yet.
        let _ = self.events.send(event);
    }

    async fn fetch_user(&self, access_token: &str) -> Result<Option<User>, ProviderError> {
        let response = self
            .client
            .get(self.endpoint(USER_PATH)?)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ProviderError::transport)?;

        if rejects_token(response.status()) {
            debug!(status = %response.status(), "Access token rejected");
            return Ok(None);
        }
        decode(response).await.map(Some)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>, ProviderError> {
        let Some(tokens) = self.tokens() else {
            return Ok(None);
        };
        let Some(user) = self.fetch_user(&tokens.access_token).await? else {
            if tokens.refresh_token.is_some() {
                debug!("Access token rejected; trying the refresh token");
                return self.refresh_session().await;
            }
            return Ok(None);
        };
        Ok(Some(Session {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_at,
            user,
        }))
    }

    async fn get_user(&self) -> Result<Option<User>, ProviderError> {
        match self.tokens() {
            Some(tokens) => self.fetch_user(&tokens.access_token).await,
            None => Ok(None),
        }
    }

    async fn refresh_session(&self) -> Result<Option<Session>, ProviderError> {
        let Some(refresh_token) = self.tokens().and_then(|tokens| tokens.refresh_token) else {
            return Ok(None);
        };

        let mut url = self.endpoint(TOKEN_PATH)?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");

        let response = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(ProviderError::transport)?;

        if matches!(response.status(), StatusCode::BAD_REQUEST) || rejects_token(response.status()) {
            warn!(status = %response.status(), "Refresh token rejected; dropping session");
            self.take_tokens();
            self.emit(AuthEvent::SignedOut);
            return Ok(None);
        }

        let token: TokenResponse = decode(response).await?;
        let session = token.into_session(OffsetDateTime::now_utc());
        *write_guard(&self.tokens, SOURCE, "refresh_session") = Some(TokenPair {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
        });
        info!(user_id = %session.user.id, "Session refreshed");
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(tokens) = self.take_tokens() else {
            self.emit(AuthEvent::SignedOut);
            return Ok(());
        };
        self.emit(AuthEvent::SignedOut);

        let response = self
            .client
            .post(self.endpoint(LOGOUT_PATH)?)
            .header("apikey", &self.anon_key)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(ProviderError::transport)?;

        let status = response.status();
        if status.is_success() || rejects_token(status) {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::status(status.as_u16(), body))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl ProfileStore for HttpIdentityProvider {
    async fn get_profile_by_id(&self, id: Uuid) -> Result<Option<Profile>, ProviderError> {
        let mut url = self.endpoint(PROFILES_PATH)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{id}"))
            .append_pair("select", "*");

        let bearer = self
            .tokens()
            .map_or_else(|| self.anon_key.clone(), |tokens| tokens.access_token);

        let response = self
            .client
            .get(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(ProviderError::transport)?;

        let rows: Vec<Profile> = decode(response).await?;
        Ok(rows.into_iter().next())
    }
}

fn rejects_token(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(ProviderError::transport)?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes).into_owned();
        return Err(ProviderError::status(status.as_u16(), body));
    }
    serde_json::from_slice(&bytes).map_err(ProviderError::decode)
}

/// `Url::join` drops the last path segment unless the base ends with `/`.
fn directory_url(base: &Url) -> Url {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}
