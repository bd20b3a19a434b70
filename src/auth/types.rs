//! Identity records and consumer-facing auth state.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Signed-in user as reported by the auth platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_sign_in_at: Option<OffsetDateTime>,
}

/// Access/refresh token pair plus the user it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) after which the access token is rejected.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now.unix_timestamp())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileRole {
    #[default]
    Customer,
    Admin,
    #[serde(other)]
    Other,
}

/// Storefront profile row keyed by the auth user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: ProfileRole,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

/// Identity held in the session cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user: User,
    pub profile: Option<Profile>,
}

impl AuthUser {
    /// Admin gating for back-office pages.
    pub fn is_admin(&self) -> bool {
        self.profile
            .as_ref()
            .is_some_and(|profile| profile.role == ProfileRole::Admin)
    }

    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .and_then(|profile| profile.full_name.as_deref())
            .or(self.user.email.as_deref())
            .unwrap_or("customer")
    }
}

/// Auth state changes pushed by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
}

impl AuthEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignedIn(_) => "signed_in",
            Self::SignedOut => "signed_out",
            Self::TokenRefreshed(_) => "token_refreshed",
            Self::UserUpdated(_) => "user_updated",
        }
    }
}

/// Host environment transitions that make a session change likely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentSignal {
    Visibility { visible: bool },
    Focus,
    Online,
}

impl EnvironmentSignal {
    /// Hiding the page never warrants a refresh.
    pub fn requests_refresh(self) -> bool {
        !matches!(self, Self::Visibility { visible: false })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visibility { .. } => "visibility",
            Self::Focus => "focus",
            Self::Online => "online",
        }
    }
}

/// What a mounted consumer renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub user: Option<User>,
    pub profile: Option<Profile>,
    pub loading: bool,
    pub error: Option<String>,
    pub is_stale: bool,
}

impl AuthSnapshot {
    pub fn ready(identity: AuthUser, is_stale: bool) -> Self {
        Self {
            user: Some(identity.user),
            profile: identity.profile,
            loading: false,
            error: None,
            is_stale,
        }
    }

    pub fn signed_out(error: Option<String>) -> Self {
        Self {
            error,
            ..Self::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn user() -> User {
        User {
            id: Uuid::nil(),
            email: Some("ram@example.com".to_string()),
            phone: None,
            role: Some("authenticated".to_string()),
            last_sign_in_at: None,
        }
    }

    #[test]
    fn profile_deserializes_with_unknown_role() {
        let profile: Profile = serde_json::from_str(
            r#"{"id":"00000000-0000-0000-0000-000000000000","full_name":"Sita","role":"reseller","created_at":"2024-05-01T10:00:00Z"}"#,
        )
        .expect("valid profile");
        assert_eq!(profile.role, ProfileRole::Other);
        assert_eq!(profile.created_at, Some(datetime!(2024-05-01 10:00:00 UTC)));
    }

    #[test]
    fn missing_profile_role_defaults_to_customer() {
        let profile: Profile =
            serde_json::from_str(r#"{"id":"00000000-0000-0000-0000-000000000000"}"#)
                .expect("valid profile");
        assert_eq!(profile.role, ProfileRole::Customer);
    }

    #[test]
    fn admin_requires_admin_profile() {
        let mut identity = AuthUser {
            user: user(),
            profile: None,
        };
        assert!(!identity.is_admin());
        assert_eq!(identity.display_name(), "ram@example.com");

        identity.profile = Some(Profile {
            id: Uuid::nil(),
            full_name: Some("Ram".to_string()),
            avatar_url: None,
            role: ProfileRole::Admin,
            created_at: None,
        });
        assert!(identity.is_admin());
        assert_eq!(identity.display_name(), "Ram");
    }

    #[test]
    fn session_expiry_uses_unix_seconds() {
        let session = Session {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: Some(datetime!(2024-01-01 00:00:00 UTC).unix_timestamp()),
            user: user(),
        };
        assert!(session.is_expired(datetime!(2024-01-01 00:00:01 UTC)));
        assert!(!session.is_expired(datetime!(2023-12-31 23:59:59 UTC)));
    }

    #[test]
    fn hidden_page_does_not_request_refresh() {
        assert!(!EnvironmentSignal::Visibility { visible: false }.requests_refresh());
        assert!(EnvironmentSignal::Visibility { visible: true }.requests_refresh());
        assert!(EnvironmentSignal::Focus.requests_refresh());
        assert!(EnvironmentSignal::Online.requests_refresh());
    }
}
