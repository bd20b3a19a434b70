//! Shared auth polling.
//!
//! One coordinator serves every mounted consumer in the process with a single
//! cache entry and a single polling task. Consumers render from a `watch`
//! channel, so the cached identity paints before any refresh completes.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, instrument, trace, warn};

use crate::cache::TtlCache;
use crate::cache::lock::lock_guard;

use super::config::AuthConfig;
use super::consumer::AuthConsumer;
use super::provider::{IdentityProvider, ProfileStore, with_timeout};
use super::types::{AuthEvent, AuthSnapshot, AuthUser, EnvironmentSignal, Session};

const SOURCE: &str = "auth::coordinator";

/// Cache key under which the signed-in identity is stored.
pub const AUTH_USER_KEY: &str = "auth:user";

const METRIC_FETCH_TOTAL: &str = "dokan_auth_fetch_total";
const METRIC_FETCH_MS: &str = "dokan_auth_fetch_ms";
const METRIC_SUBSCRIBERS: &str = "dokan_auth_subscribers";

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why an identity fetch was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchTrigger {
    /// First consumer mounted with nothing cached.
    Mount,
    /// A consumer mounted onto a stale entry.
    Revalidate,
    /// Shared polling timer tick.
    Poll,
    /// Visibility, focus or connectivity came back.
    Signal,
    /// Provider reported a sign-in or token change.
    AuthEvent,
    /// Explicit user request.
    Refetch,
}

impl FetchTrigger {
    /// Background fetches honour the minimum refetch interval.
    fn is_background(self) -> bool {
        matches!(self, Self::Revalidate | Self::Poll)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Revalidate => "revalidate",
            Self::Poll => "poll",
            Self::Signal => "signal",
            Self::AuthEvent => "auth_event",
            Self::Refetch => "refetch",
        }
    }
}

enum Resolution {
    Authenticated(AuthUser),
    SignedOut,
    Failed(String),
}

impl Resolution {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Authenticated(identity) if identity.profile.is_some() => "authenticated",
            Self::Authenticated(_) => "authenticated_without_profile",
            Self::SignedOut => "signed_out",
            Self::Failed(_) => "error",
        }
    }
}

struct PollingTasks {
    timer: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl Drop for PollingTasks {
    fn drop(&mut self) {
        self.timer.abort();
        self.listener.abort();
    }
}

struct CoordinatorState {
    subscribers: usize,
    tasks: Option<PollingTasks>,
    last_fetch_completed: Option<Instant>,
    last_signal_fetch: Option<Instant>,
    /// Highest sequence number handed to a fetch or a sign-out.
    latest_sequence: u64,
    /// Session lookups (including any refresh they trigger) still running.
    session_lookups: usize,
    /// Access token of the last session a lookup resolved.
    resolved_token: Option<String>,
}

/// Counts a running session lookup. The provider announces refreshes made on
/// a lookup's behalf, and those announcements must not start another fetch.
struct SessionLookup<'a> {
    state: &'a Mutex<CoordinatorState>,
}

impl<'a> SessionLookup<'a> {
    fn begin(state: &'a Mutex<CoordinatorState>) -> Self {
        lock_guard(state, SOURCE, "session_lookup.begin").session_lookups += 1;
        Self { state }
    }

    fn resolved(self, session: &Session) {
        lock_guard(self.state, SOURCE, "session_lookup.resolved").resolved_token =
            Some(session.access_token.clone());
    }
}

impl Drop for SessionLookup<'_> {
    fn drop(&mut self) {
        let mut state = lock_guard(self.state, SOURCE, "session_lookup.end");
        state.session_lookups = state.session_lookups.saturating_sub(1);
    }
}

/// Keeps the identity key marked as revalidating for the lifetime of a fetch,
/// including fetches that are cancelled mid-flight.
struct RevalidationMark<'a> {
    cache: &'a TtlCache<AuthUser>,
}

impl<'a> RevalidationMark<'a> {
    fn hold(cache: &'a TtlCache<AuthUser>) -> Self {
        cache.mark_revalidating(AUTH_USER_KEY);
        Self { cache }
    }
}

impl Drop for RevalidationMark<'_> {
    fn drop(&mut self) {
        self.cache.clear_revalidating(AUTH_USER_KEY);
    }
}

/// Process-wide owner of the cached identity and its refresh machinery.
pub struct PollingCoordinator {
    config: AuthConfig,
    cache: Arc<TtlCache<AuthUser>>,
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    snapshot: watch::Sender<AuthSnapshot>,
    state: Mutex<CoordinatorState>,
    this: Weak<Self>,
}

impl PollingCoordinator {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        cache: Arc<TtlCache<AuthUser>>,
        config: AuthConfig,
    ) -> Arc<Self> {
        let (snapshot, _) = watch::channel(AuthSnapshot::default());
        Arc::new_cyclic(|this| Self {
            config,
            cache,
            identity,
            profiles,
            snapshot,
            state: Mutex::new(CoordinatorState {
                subscribers: 0,
                tasks: None,
                last_fetch_completed: None,
                last_signal_fetch: None,
                latest_sequence: 0,
                session_lookups: 0,
                resolved_token: None,
            }),
            this: this.clone(),
        })
    }

    /// Register a consumer and paint it from the cache.
    ///
    /// The first mount starts the shared polling timer. A cached identity is
    /// published immediately; a stale one is revalidated in the background and
    /// a missing one is fetched right away. Must be called within a Tokio
    /// runtime.
    pub fn mount(self: &Arc<Self>) -> AuthConsumer {
        self.retain();
        let receiver = self.snapshot.subscribe();

        let status = self.cache.get_with_status(AUTH_USER_KEY);
        match status.data {
            Some(identity) => {
                debug!(is_stale = status.is_stale, "Serving identity from cache");
                self.publish(AuthSnapshot::ready(identity, status.is_stale));
                if status.is_stale && self.cache.try_begin_revalidation(AUTH_USER_KEY) {
                    self.spawn_fetch(FetchTrigger::Revalidate);
                }
            }
            None => {
                self.snapshot.send_if_modified(|snapshot| {
                    let changed = !snapshot.loading;
                    snapshot.loading = true;
                    changed
                });
                if self.cache.try_begin_revalidation(AUTH_USER_KEY) {
                    self.spawn_fetch(FetchTrigger::Mount);
                }
            }
        }

        AuthConsumer::new(Arc::clone(self), receiver)
    }

    /// Current consumer-facing state.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Synchronous peek at the cached identity, for code outside any consumer.
    pub fn cached_user(&self) -> Option<AuthUser> {
        self.cache.get(AUTH_USER_KEY)
    }

    /// Drop the cached identity so the next read goes to the provider.
    pub fn clear_user_cache(&self) {
        self.cache.delete(AUTH_USER_KEY);
    }

    pub fn subscriber_count(&self) -> usize {
        lock_guard(&self.state, SOURCE, "subscriber_count").subscribers
    }

    /// True while the shared polling timer is alive.
    pub fn is_polling(&self) -> bool {
        lock_guard(&self.state, SOURCE, "is_polling")
            .tasks
            .as_ref()
            .is_some_and(|tasks| !tasks.timer.is_finished())
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TtlCache<AuthUser>> {
        &self.cache
    }

    /// User-initiated refresh; ignores the minimum refetch interval.
    pub async fn refetch(&self) {
        self.fetch(FetchTrigger::Refetch).await;
    }

    /// React to a host environment transition.
    ///
    /// Returns whether a refresh ran. Signals are ignored while nothing is
    /// mounted and are debounced together.
    pub async fn notify(&self, signal: EnvironmentSignal) -> bool {
        if !signal.requests_refresh() {
            return false;
        }

        let now = Instant::now();
        {
            let mut state = lock_guard(&self.state, SOURCE, "notify");
            if state.subscribers == 0 {
                trace!(signal = signal.as_str(), "Ignoring signal with no consumers");
                return false;
            }
            let debounced = state.last_signal_fetch.is_some_and(|last| {
                now.saturating_duration_since(last) < self.config.signal_debounce
            });
            if debounced {
                debug!(signal = signal.as_str(), "Environment signal debounced");
                return false;
            }
            state.last_signal_fetch = Some(now);
        }

        info!(signal = signal.as_str(), "Refreshing identity after environment signal");
        self.fetch(FetchTrigger::Signal).await;
        true
    }

    /// Apply an auth state change reported by the provider.
    pub async fn handle_event(&self, event: AuthEvent) {
        info!(event = event.as_str(), "Auth state changed");
        match event {
            AuthEvent::SignedOut => self.invalidate_session(None),
            AuthEvent::TokenRefreshed(session) if self.refreshed_by_lookup(&session) => {
                debug!("Token was refreshed by our own session lookup; not refetching");
            }
            AuthEvent::SignedIn(_) | AuthEvent::TokenRefreshed(_) | AuthEvent::UserUpdated(_) => {
                self.fetch(FetchTrigger::AuthEvent).await;
            }
        }
    }

    /// Forget the identity locally, then tell the provider.
    ///
    /// Provider failures are recorded in the snapshot's `error`, never returned.
    pub async fn sign_out(&self) {
        self.invalidate_session(None);

        let result = with_timeout(
            self.config.request_timeout,
            "sign_out",
            self.identity.sign_out(),
            Ok(()),
        )
        .await;

        match result {
            Ok(()) => info!("Signed out"),
            Err(err) => {
                warn!(error = %err, "Provider sign-out failed; local session already cleared");
                let message = err.to_string();
                self.snapshot
                    .send_modify(|snapshot| snapshot.error = Some(message));
            }
        }
    }

    pub(crate) fn release(&self) {
        let stopped = {
            let mut state = lock_guard(&self.state, SOURCE, "release");
            state.subscribers = state.subscribers.saturating_sub(1);
            gauge!(METRIC_SUBSCRIBERS).set(state.subscribers as f64);
            if state.subscribers == 0 {
                state.tasks.take()
            } else {
                None
            }
        };

        if let Some(tasks) = stopped {
            drop(tasks);
            info!("Stopped shared auth polling");
        }
    }

    fn retain(&self) {
        let mut state = lock_guard(&self.state, SOURCE, "retain");
        state.subscribers += 1;
        gauge!(METRIC_SUBSCRIBERS).set(state.subscribers as f64);
        if state.tasks.is_none() {
            state.tasks = Some(self.spawn_tasks());
            info!(
                poll_interval_ms = duration_ms(self.config.poll_interval),
                "Started shared auth polling"
            );
        }
    }

    fn spawn_tasks(&self) -> PollingTasks {
        let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        let weak = self.this.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.poll_tick().await;
            }
        });

        let mut events = self.identity.subscribe();
        let weak = self.this.clone();
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(coordinator) = weak.upgrade() else {
                            break;
                        };
                        coordinator.handle_event(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth event listener fell behind the provider");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        PollingTasks { timer, listener }
    }

    async fn poll_tick(&self) {
        if !self.cache.has(AUTH_USER_KEY) {
            trace!("No cached identity; skipping poll");
            return;
        }
        if self.cache.is_revalidating(AUTH_USER_KEY) {
            debug!("Refresh already in flight; skipping poll");
            return;
        }
        self.fetch(FetchTrigger::Poll).await;
    }

    fn spawn_fetch(&self, trigger: FetchTrigger) {
        let Some(this) = self.this.upgrade() else {
            self.cache.clear_revalidating(AUTH_USER_KEY);
            return;
        };
        tokio::spawn(async move {
            this.fetch(trigger).await;
        });
    }

    #[instrument(skip(self))]
    async fn fetch(&self, trigger: FetchTrigger) {
        let _mark = RevalidationMark::hold(&self.cache);
        let started = Instant::now();

        let sequence = {
            let mut state = lock_guard(&self.state, SOURCE, "fetch.begin");
            let too_soon = trigger.is_background()
                && state.last_fetch_completed.is_some_and(|completed| {
                    started.saturating_duration_since(completed) < self.config.min_refetch_interval
                });
            if too_soon {
                debug!("Skipping background fetch inside minimum refetch interval");
                counter!(METRIC_FETCH_TOTAL, "trigger" => trigger.as_str(), "outcome" => "skipped")
                    .increment(1);
                return;
            }
            state.latest_sequence += 1;
            state.latest_sequence
        };

        if !trigger.is_background() {
            self.snapshot.send_if_modified(|snapshot| {
                let show_loading = snapshot.user.is_none() && !snapshot.loading;
                if show_loading {
                    snapshot.loading = true;
                }
                show_loading
            });
        }

        let resolution = self.resolve().await;
        let outcome = resolution.outcome();
        let applied = self.apply(sequence, resolution);

        lock_guard(&self.state, SOURCE, "fetch.complete").last_fetch_completed =
            Some(Instant::now());

        let elapsed = started.elapsed();
        counter!(METRIC_FETCH_TOTAL, "trigger" => trigger.as_str(), "outcome" => outcome)
            .increment(1);
        histogram!(METRIC_FETCH_MS, "trigger" => trigger.as_str())
            .record(elapsed.as_secs_f64() * 1000.0);
        debug!(
            sequence,
            outcome,
            applied,
            elapsed_ms = duration_ms(elapsed),
            "Identity fetch finished"
        );
    }

    async fn resolve(&self) -> Resolution {
        let limit = self.config.request_timeout;

        let lookup = SessionLookup::begin(&self.state);
        let session = match self.resolve_session(limit).await {
            Ok(session) => session,
            Err(resolution) => return resolution,
        };
        lookup.resolved(&session);

        let user = session.user;
        let profile = match with_timeout(
            limit,
            "get_profile_by_id",
            self.profiles.get_profile_by_id(user.id),
            Ok(None),
        )
        .await
        {
            Ok(profile) => profile,
            Err(err) => {
                warn!(user_id = %user.id, error = %err, "Profile lookup failed; continuing without profile");
                None
            }
        };

        Resolution::Authenticated(AuthUser { user, profile })
    }

    /// Current session, refreshed first when its access token has expired.
    async fn resolve_session(&self, limit: Duration) -> Result<Session, Resolution> {
        let session =
            match with_timeout(limit, "get_session", self.identity.get_session(), Ok(None)).await {
                Ok(Some(session)) => session,
                Ok(None) => return Err(Resolution::SignedOut),
                Err(err) => {
                    warn!(error = %err, "Session lookup failed");
                    return Err(Resolution::Failed(err.to_string()));
                }
            };

        if !session.is_expired(OffsetDateTime::now_utc()) {
            return Ok(session);
        }

        debug!("Session expired; refreshing");
        match with_timeout(
            limit,
            "refresh_session",
            self.identity.refresh_session(),
            Ok(None),
        )
        .await
        {
            Ok(Some(refreshed)) => Ok(refreshed),
            Ok(None) => Err(Resolution::SignedOut),
            Err(err) => {
                warn!(error = %err, "Session refresh failed");
                Err(Resolution::Failed(err.to_string()))
            }
        }
    }

    fn refreshed_by_lookup(&self, session: &Session) -> bool {
        let state = lock_guard(&self.state, SOURCE, "refreshed_by_lookup");
        state.session_lookups > 0
            || state.resolved_token.as_deref() == Some(session.access_token.as_str())
    }

    /// Publish a fetch result unless a newer fetch or sign-out has started.
    fn apply(&self, sequence: u64, resolution: Resolution) -> bool {
        let state = lock_guard(&self.state, SOURCE, "apply");
        if sequence != state.latest_sequence {
            debug!(
                sequence,
                latest = state.latest_sequence,
                "Discarding superseded identity fetch"
            );
            return false;
        }

        match resolution {
            Resolution::Authenticated(identity) => {
                self.cache.set_with_stale(
                    AUTH_USER_KEY,
                    identity.clone(),
                    self.config.fresh_window,
                    self.config.stale_window,
                );
                self.publish(AuthSnapshot::ready(identity, false));
            }
            Resolution::SignedOut => {
                self.cache.delete(AUTH_USER_KEY);
                self.publish(AuthSnapshot::signed_out(None));
            }
            Resolution::Failed(message) => {
                self.cache.delete(AUTH_USER_KEY);
                self.publish(AuthSnapshot::signed_out(Some(message)));
            }
        }
        true
    }

    fn invalidate_session(&self, error: Option<String>) {
        let mut state = lock_guard(&self.state, SOURCE, "invalidate_session");
        state.latest_sequence += 1;
        state.resolved_token = None;
        self.cache.delete(AUTH_USER_KEY);
        self.publish(AuthSnapshot::signed_out(error));
    }

    fn publish(&self, next: AuthSnapshot) {
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
