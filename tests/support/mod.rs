#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dokan::auth::{
    AuthConfig, AuthConsumer, AuthEvent, AuthSnapshot, AuthUser, IdentityProvider,
    PollingCoordinator, Profile, ProfileRole, ProfileStore, ProviderError, Session, User,
};
use dokan::cache::TtlCache;
use tokio::sync::broadcast;
use uuid::Uuid;

pub fn user(email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        email: Some(email.to_string()),
        phone: None,
        role: Some("authenticated".to_string()),
        last_sign_in_at: None,
    }
}

pub fn session_for(user: User) -> Session {
    Session {
        access_token: format!("access-{}", user.id),
        refresh_token: Some(format!("refresh-{}", user.id)),
        expires_at: None,
        user,
    }
}

pub fn profile_for(user: &User, role: ProfileRole) -> Profile {
    Profile {
        id: user.id,
        full_name: Some("Ayu Lestari".to_string()),
        avatar_url: None,
        role,
        created_at: None,
    }
}

pub fn identity(email: &str) -> AuthUser {
    AuthUser {
        user: user(email),
        profile: None,
    }
}

#[derive(Default)]
struct IdentityState {
    session: Option<Session>,
    refreshed: Option<Session>,
    session_error: Option<String>,
    sign_out_error: Option<String>,
    session_delays: VecDeque<Duration>,
    sign_out_delay: Duration,
}

/// In-process identity provider with scripted answers and call counters.
pub struct FakeIdentity {
    state: Mutex<IdentityState>,
    session_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    events: broadcast::Sender<AuthEvent>,
}

impl FakeIdentity {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            state: Mutex::new(IdentityState::default()),
            session_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            events,
        })
    }

    pub fn signed_in(session: Session) -> Arc<Self> {
        let fake = Self::new();
        fake.set_session(Some(session));
        fake
    }

    fn state(&self) -> std::sync::MutexGuard<'_, IdentityState> {
        self.state.lock().expect("fake identity state")
    }

    pub fn set_session(&self, session: Option<Session>) {
        self.state().session = session;
    }

    pub fn set_refreshed(&self, session: Option<Session>) {
        self.state().refreshed = session;
    }

    pub fn fail_sessions(&self, message: &str) {
        self.state().session_error = Some(message.to_string());
    }

    pub fn fail_sign_out(&self, message: &str) {
        self.state().sign_out_error = Some(message.to_string());
    }

    /// Delay the next `get_session` call by `delay`. Calls past the queue answer at once.
    pub fn queue_session_delay(&self, delay: Duration) {
        self.state().session_delays.push_back(delay);
    }

    pub fn set_sign_out_delay(&self, delay: Duration) {
        self.state().sign_out_delay = delay;
    }

    pub fn emit(&self, event: AuthEvent) {
        self.events.send(event).expect("listener subscribed");
    }

    pub fn session_calls(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn get_session(&self) -> Result<Option<Session>, ProviderError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        // Answer with what was configured when the call started.
        let (delay, answer) = {
            let mut state = self.state();
            let delay = state.session_delays.pop_front().unwrap_or_default();
            let answer = match state.session_error.clone() {
                Some(message) => Err(message),
                None => Ok(state.session.clone()),
            };
            (delay, answer)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        answer.map_err(ProviderError::transport)
    }

    async fn get_user(&self) -> Result<Option<User>, ProviderError> {
        Ok(self.state().session.clone().map(|session| session.user))
    }

    async fn refresh_session(&self) -> Result<Option<Session>, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let refreshed = {
            let mut state = self.state();
            let refreshed = state.refreshed.clone();
            if refreshed.is_some() {
                state.session = refreshed.clone();
            }
            refreshed
        };
        // Like a real provider, announce the new token to every listener.
        if let Some(session) = refreshed.as_ref() {
            let _ = self.events.send(AuthEvent::TokenRefreshed(session.clone()));
        }
        Ok(refreshed)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, error) = {
            let state = self.state();
            (state.sign_out_delay, state.sign_out_error.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match error {
            Some(message) => Err(ProviderError::status(500, message)),
            None => Ok(()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// In-process profile table.
#[derive(Default)]
pub struct FakeProfiles {
    rows: Mutex<HashMap<Uuid, Profile>>,
    error: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FakeProfiles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, profile: Profile) {
        self.rows
            .lock()
            .expect("fake profile rows")
            .insert(profile.id, profile);
    }

    pub fn fail(&self, message: &str) {
        *self.error.lock().expect("fake profile error") = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for FakeProfiles {
    async fn get_profile_by_id(&self, id: Uuid) -> Result<Option<Profile>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.error.lock().expect("fake profile error").clone() {
            return Err(ProviderError::transport(message));
        }
        Ok(self.rows.lock().expect("fake profile rows").get(&id).cloned())
    }
}

pub fn coordinator(
    identity: &Arc<FakeIdentity>,
    profiles: &Arc<FakeProfiles>,
    config: AuthConfig,
) -> Arc<PollingCoordinator> {
    PollingCoordinator::new(
        Arc::clone(identity) as Arc<dyn IdentityProvider>,
        Arc::clone(profiles) as Arc<dyn ProfileStore>,
        Arc::new(TtlCache::new()),
        config,
    )
}

/// Wait for a published state matching `predicate`, failing after a minute of
/// (virtual) time.
pub async fn wait_until<F>(consumer: &mut AuthConsumer, predicate: F) -> AuthSnapshot
where
    F: Fn(&AuthSnapshot) -> bool,
{
    let wait = async {
        loop {
            let snapshot = consumer.snapshot();
            if predicate(&snapshot) {
                return snapshot;
            }
            consumer.changed().await;
        }
    };
    tokio::time::timeout(Duration::from_secs(60), wait)
        .await
        .expect("snapshot condition not reached")
}

/// Let spawned tasks run without moving the clock.
pub async fn settle_tasks() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
