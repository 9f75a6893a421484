//! Session lifecycle: restore, login redirect, token ingestion, profile
//! validation, expiry and logout.
//!
//! `SessionManager` is the single writer of session state and the only
//! component that touches durable storage. Consumers read through
//! [`SessionManager::snapshot`] or a [`SessionManager::subscribe`] channel.
//!
//! Background work runs on Tokio tasks:
//! - one expiry timer per adopted token, aborted on any replacement
//! - one profile validation fetch per adoption
//!
//! Both carry the session generation they were started for and are ignored
//! once the generation moves on, so a late result can never touch a newer
//! (or already cleared) session. The methods that start these tasks must be
//! called from within a Tokio runtime.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::authorize::{authorization_url, parse_redirect_fragment};
use super::session::{
    logout_delay, SessionData, SessionSnapshot, SessionState, MAX_TOKEN_LIFETIME_SECS,
};
use super::store::{SessionStore, CACHED_USER_KEY, EXPIRATION_KEY, SESSION_KEYS, TOKEN_KEY};
use super::AuthError;
use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::models::UserProfile;

/// Source of the signed-in user's profile. Implemented by [`ApiClient`];
/// tests substitute scripted fetchers.
pub trait ProfileFetcher: Send + Sync + 'static {
    fn fetch_profile(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<UserProfile, ApiError>> + Send;
}

/// The surface that owns the address bar: sends the user to the consent
/// page and tidies the redirect fragment afterwards.
pub trait Navigator {
    /// Leave the application for `url`. Nothing after this is expected to run
    /// in the current page lifecycle.
    fn navigate(&self, url: &str);

    /// Remove the token fragment from the visible address so a reload does
    /// not ingest it again.
    fn clear_fragment(&self) {}
}

struct ExpiryTimer {
    handle: JoinHandle<()>,
    delay: Duration,
    deadline: Instant,
}

struct Inner {
    state: SessionState,
    data: Option<SessionData>,
    /// Bumped whenever the active token is replaced or cleared.
    generation: u64,
    expiry_timer: Option<ExpiryTimer>,
    profile_task: Option<JoinHandle<()>>,
}

struct Shared<P> {
    store: Box<dyn SessionStore>,
    profiles: P,
    inner: Mutex<Inner>,
    updates: watch::Sender<SessionSnapshot>,
}

pub struct SessionManager<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for SessionManager<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: ProfileFetcher> SessionManager<P> {
    /// Create a manager in the `Restoring` state. Call [`restore`](Self::restore)
    /// once at startup.
    pub fn new(store: Box<dyn SessionStore>, profiles: P) -> Self {
        let (updates, _) = watch::channel(SessionSnapshot::restoring());
        Self {
            shared: Arc::new(Shared {
                store,
                profiles,
                inner: Mutex::new(Inner {
                    state: SessionState::Restoring,
                    data: None,
                    generation: 0,
                    expiry_timer: None,
                    profile_task: None,
                }),
                updates,
            }),
        }
    }

    /// Adopt a persisted session if its token has not expired yet.
    ///
    /// The expiry timer is re-armed for the time actually left. A corrupt
    /// cached profile is dropped without affecting the token. Anything else
    /// unusable (missing token, missing or unparseable expiration, expired
    /// token) leaves the session unauthenticated with storage cleared.
    pub fn restore(&self) -> SessionState {
        let shared = &self.shared;
        let mut inner = shared.lock();

        match shared.read_persisted() {
            Some(data) => {
                let delay = data.remaining();
                info!(
                    expires_at = %data.expires_at,
                    has_user = data.user.is_some(),
                    "Restored session from storage"
                );
                shared.adopt(&mut inner, data, delay);
            }
            None => {
                debug!("No valid stored session");
                shared.clear(&mut inner);
            }
        }

        shared.publish(&inner);
        inner.state
    }

    /// Send the user to the consent page.
    ///
    /// Fails with a configuration error, without navigating, when no client
    /// ID is configured or the redirect URI is unusable.
    pub fn login(&self, config: &Config, navigator: &dyn Navigator) -> Result<(), AuthError> {
        let url = config
            .client_id()
            .and_then(|client_id| authorization_url(client_id, config.redirect_uri()))
            .inspect_err(|e| error!(error = %e, "Cannot start login"))?;

        info!("Redirecting to authorization page");
        navigator.navigate(&url);
        Ok(())
    }

    /// Adopt a token delivered by the authorization server.
    ///
    /// Persists the token and its absolute expiry, arms the logout timer
    /// `EXPIRY_MARGIN_SECS` before expiry (immediately for short-lived
    /// tokens), and starts validating the profile. Any previous token and
    /// its timer are replaced. Lifetimes beyond `MAX_TOKEN_LIFETIME_SECS`
    /// are rejected before anything is persisted.
    pub fn ingest_token(&self, access_token: &str, expires_in: u64) -> Result<(), AuthError> {
        if access_token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        if expires_in == 0 || expires_in > MAX_TOKEN_LIFETIME_SECS {
            return Err(AuthError::InvalidExpiry);
        }

        let shared = &self.shared;
        let mut inner = shared.lock();

        let data = SessionData::issued_now(access_token.to_string(), expires_in);
        shared.persist_token(&data);
        shared.adopt(&mut inner, data, logout_delay(expires_in));
        info!(expires_in = expires_in, "Token ingested");

        shared.publish(&inner);
        Ok(())
    }

    /// Ingest the token carried by a redirect fragment, if there is one.
    ///
    /// Returns true when a token was ingested. Fragments without a complete,
    /// well-formed token are ignored.
    pub fn handle_redirect_callback(&self, fragment: &str, navigator: &dyn Navigator) -> bool {
        let Some(grant) = parse_redirect_fragment(fragment) else {
            if !fragment.trim().trim_start_matches('#').is_empty() {
                debug!("Redirect fragment carries no token");
            }
            return false;
        };

        match self.ingest_token(&grant.access_token, grant.expires_in) {
            Ok(()) => {
                navigator.clear_fragment();
                true
            }
            Err(e) => {
                warn!(error = %e, "Rejected token from redirect");
                false
            }
        }
    }

    /// Re-validate the active token by fetching the profile. Adoption does
    /// this automatically; a no-op without a session.
    pub fn fetch_profile(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        let Some(token) = inner.data.as_ref().map(|d| d.token.clone()) else {
            debug!("No session, skipping profile fetch");
            return;
        };
        let generation = inner.generation;
        inner.profile_task = Some(shared.spawn_profile_fetch(generation, token));
    }

    /// Clear the session, its persisted keys and any pending expiry timer.
    /// Safe to call when already logged out.
    pub fn logout(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        if inner.data.is_some() {
            info!("Logging out");
        }
        shared.clear(&mut inner);
        shared.publish(&inner);
    }

    /// Route a failure from an API call made with `token` through the
    /// session. An authorization failure ends the session only while `token`
    /// is still the active one; everything else is only logged.
    ///
    /// Returns true if the session was ended.
    pub fn handle_api_error(&self, token: &str, error: &ApiError) -> bool {
        if !error.is_authorization() {
            warn!(error = %error, "API request failed");
            return false;
        }

        let shared = &self.shared;
        let mut inner = shared.lock();
        if inner.data.as_ref().map(|d| d.token.as_str()) != Some(token) {
            debug!(error = %error, "Ignoring authorization failure for a replaced token");
            return false;
        }

        warn!(error = %error, "Token rejected by API, logging out");
        shared.clear(&mut inner);
        shared.publish(&inner);
        true
    }

    /// Wait for the in-flight profile validation, if any, to finish.
    pub async fn settle(&self) {
        let task = self.shared.lock().profile_task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Profile fetch task failed");
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.lock();
        SessionSnapshot::from_parts(inner.state, inner.data.as_ref())
    }

    /// Receive a fresh snapshot on every session change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.updates.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot().is_authenticated
    }

    /// The bearer token, for building an API client.
    pub fn token(&self) -> Option<String> {
        self.shared.lock().data.as_ref().map(|d| d.token.clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().data.as_ref().map(|d| d.expires_at)
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.shared.lock().data.as_ref().and_then(|d| d.user.clone())
    }

    /// Delay the pending expiry timer was armed with.
    pub fn expiry_delay(&self) -> Option<Duration> {
        self.shared.lock().expiry_timer.as_ref().map(|t| t.delay)
    }

    /// Time left until the pending expiry timer fires.
    pub fn expiry_remaining(&self) -> Option<Duration> {
        self.shared
            .lock()
            .expiry_timer
            .as_ref()
            .map(|t| t.deadline.saturating_duration_since(Instant::now()))
    }
}

impl SessionManager<ApiClient> {
    /// A client carrying the current token. Rebuild it after every session
    /// change; the token it holds is not updated.
    pub fn api_client(&self) -> Option<ApiClient> {
        self.token().map(|token| self.shared.profiles.with_token(token))
    }
}

impl<P: ProfileFetcher> Shared<P> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.updates
            .send_replace(SessionSnapshot::from_parts(inner.state, inner.data.as_ref()));
    }

    /// Make `data` the active session: cancel the old timer, move to a new
    /// generation, arm the expiry timer and start profile validation.
    fn adopt(self: &Arc<Self>, inner: &mut Inner, data: SessionData, delay: Duration) {
        if let Some(timer) = inner.expiry_timer.take() {
            timer.handle.abort();
        }
        inner.generation += 1;
        let generation = inner.generation;
        let token = data.token.clone();

        inner.data = Some(data);
        inner.state = SessionState::Authenticated;
        inner.expiry_timer = Some(self.arm_expiry_timer(generation, delay));
        inner.profile_task = Some(self.spawn_profile_fetch(generation, token));
    }

    fn clear(&self, inner: &mut Inner) {
        if let Some(timer) = inner.expiry_timer.take() {
            timer.handle.abort();
        }
        inner.generation += 1;
        inner.data = None;
        inner.state = SessionState::Unauthenticated;

        for key in SESSION_KEYS {
            if let Err(e) = self.store.remove(key) {
                warn!(key = key, error = %e, "Failed to remove stored session key");
            }
        }
    }

    fn arm_expiry_timer(self: &Arc<Self>, generation: u64, delay: Duration) -> ExpiryTimer {
        let delay = delay.min(Duration::from_secs(MAX_TOKEN_LIFETIME_SECS));
        // Deadline is fixed now, not when the task is first polled
        let deadline = Instant::now() + delay;
        let shared: Weak<Self> = Arc::downgrade(self);
        debug!(delay_secs = delay.as_secs(), "Expiry timer armed");

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(generation);
            }
        });

        ExpiryTimer {
            handle,
            delay,
            deadline,
        }
    }

    fn expire(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        // This task is the timer; take it so clearing does not abort itself
        inner.expiry_timer.take();
        info!("Session expired");
        self.clear(&mut inner);
        self.publish(&inner);
    }

    fn spawn_profile_fetch(self: &Arc<Self>, generation: u64, token: String) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result = shared.profiles.fetch_profile(&token).await;
            shared.complete_profile_fetch(generation, result);
        })
    }

    fn complete_profile_fetch(&self, generation: u64, result: Result<UserProfile, ApiError>) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.data.is_none() {
            debug!("Discarding profile result for a replaced session");
            return;
        }

        match result {
            Ok(profile) => {
                debug!(user_id = %profile.id, "Profile validated");
                match serde_json::to_string(&profile) {
                    Ok(json) => {
                        if let Err(e) = self.store.set(CACHED_USER_KEY, &json) {
                            warn!(error = %e, "Failed to persist profile");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize profile"),
                }
                if let Some(data) = inner.data.as_mut() {
                    data.user = Some(profile);
                }
            }
            Err(e) if e.is_authorization() => {
                warn!(error = %e, "Token rejected during profile validation, logging out");
                self.clear(&mut inner);
            }
            Err(e) => {
                warn!(error = %e, "Profile fetch failed, keeping session");
                return;
            }
        }

        self.publish(&inner);
    }

    fn persist_token(&self, data: &SessionData) {
        let expiration = data.expires_at.timestamp_millis().to_string();
        let result = self
            .store
            .set(TOKEN_KEY, &data.token)
            .and_then(|_| self.store.set(EXPIRATION_KEY, &expiration))
            // A stale profile belongs to whoever held the previous token
            .and_then(|_| self.store.remove(CACHED_USER_KEY));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session; it will not survive a restart");
        }
    }

    fn read_persisted(&self) -> Option<SessionData> {
        let read = |key: &str| match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read stored session key");
                None
            }
        };

        let token = read(TOKEN_KEY).filter(|t| !t.is_empty())?;
        let Some(expires_at) = read(EXPIRATION_KEY)
            .and_then(|ms| ms.trim().parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
        else {
            warn!("Stored token has no valid expiration, discarding");
            return None;
        };

        if expires_at <= Utc::now() {
            info!(expired_at = %expires_at, "Stored token has expired");
            return None;
        }

        let user = read(CACHED_USER_KEY).and_then(|json| {
            match serde_json::from_str::<UserProfile>(&json) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(error = %e, "Dropping unreadable cached profile");
                    if let Err(e) = self.store.remove(CACHED_USER_KEY) {
                        warn!(error = %e, "Failed to remove cached profile");
                    }
                    None
                }
            }
        });

        Some(SessionData {
            token,
            expires_at,
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStore;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Clone, Copy)]
    enum Outcome {
        Profile,
        Unauthorized,
        Forbidden,
        ServerError,
        /// 401 for this one token, profile for any other
        RejectToken(&'static str),
    }

    /// Answers profile requests with a fixed outcome, optionally holding
    /// each answer until released.
    #[derive(Clone)]
    struct ScriptedProfiles {
        outcome: Outcome,
        gate: Option<Arc<Notify>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProfiles {
        fn new(outcome: Outcome) -> Self {
            Self {
                outcome,
                gate: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn gated(outcome: Outcome) -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            let mut profiles = Self::new(outcome);
            profiles.gate = Some(Arc::clone(&gate));
            (profiles, gate)
        }
    }

    impl ProfileFetcher for ScriptedProfiles {
        fn fetch_profile(
            &self,
            token: &str,
        ) -> impl Future<Output = Result<UserProfile, ApiError>> + Send {
            let this = self.clone();
            let token = token.to_string();
            async move {
                if let Some(gate) = &this.gate {
                    gate.notified().await;
                }
                this.calls.fetch_add(1, Ordering::SeqCst);
                match this.outcome {
                    Outcome::Profile => Ok(profile_for(&token)),
                    Outcome::Unauthorized => Err(ApiError::Unauthorized),
                    Outcome::Forbidden => Err(ApiError::AccessDenied("insufficient scope".into())),
                    Outcome::ServerError => Err(ApiError::ServerError("upstream".into())),
                    Outcome::RejectToken(rejected) if rejected == token => Err(ApiError::Unauthorized),
                    Outcome::RejectToken(_) => Ok(profile_for(&token)),
                }
            }
        }
    }

    fn profile_for(token: &str) -> UserProfile {
        UserProfile {
            id: format!("user-{}", token),
            display_name: Some("Listener".to_string()),
            email: None,
            country: Some("SE".to_string()),
            product: Some("premium".to_string()),
            images: Vec::new(),
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        visited: RefCell<Vec<String>>,
        cleared: RefCell<usize>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, url: &str) {
            self.visited.borrow_mut().push(url.to_string());
        }

        fn clear_fragment(&self) {
            *self.cleared.borrow_mut() += 1;
        }
    }

    fn manager(store: &MemoryStore, profiles: ScriptedProfiles) -> SessionManager<ScriptedProfiles> {
        SessionManager::new(Box::new(store.clone()), profiles)
    }

    fn persist(store: &MemoryStore, token: &str, expires_at: DateTime<Utc>, user: Option<&str>) {
        store.set(TOKEN_KEY, token).unwrap();
        store
            .set(EXPIRATION_KEY, &expires_at.timestamp_millis().to_string())
            .unwrap();
        if let Some(user) = user {
            store.set(CACHED_USER_KEY, user).unwrap();
        }
    }

    #[tokio::test]
    async fn test_ingest_token_scenario() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));

        session.ingest_token("abc123", 3600).unwrap();

        assert_eq!(session.token().as_deref(), Some("abc123"));
        assert!(session.is_authenticated());
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.expiry_delay(), Some(Duration::from_secs(3540)));
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("abc123"));

        let expiration: i64 = store.get(EXPIRATION_KEY).unwrap().unwrap().parse().unwrap();
        let expected = (Utc::now() + chrono::Duration::seconds(3600)).timestamp_millis();
        assert!((expected - expiration).abs() < 1000);

        session.settle().await;
        let user = session.user().expect("Profile should be loaded");
        assert_eq!(user.id, "user-abc123");
        assert!(store.get(CACHED_USER_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ingest_rejects_invalid_input() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));

        assert_eq!(session.ingest_token("", 3600), Err(AuthError::EmptyToken));
        assert_eq!(session.ingest_token("abc", 0), Err(AuthError::InvalidExpiry));
        assert_eq!(
            session.ingest_token("abc", MAX_TOKEN_LIFETIME_SECS + 1),
            Err(AuthError::InvalidExpiry)
        );
        assert!(!session.is_authenticated());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_timer_fires_one_minute_early() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        session.ingest_token("abc123", 3600).unwrap();
        session.settle().await;

        tokio::time::sleep(Duration::from_secs(3539)).await;
        assert!(session.is_authenticated(), "timer fired before expires_in - 60");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!session.is_authenticated(), "timer did not fire at expires_in - 60");
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.token(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_token_expires_immediately() {
        for expires_in in [1, 30, 60] {
            let store = MemoryStore::new();
            let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
            session.ingest_token("short", expires_in).unwrap();
            assert_eq!(session.expiry_delay(), Some(Duration::ZERO));

            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(session.state(), SessionState::Unauthenticated);
            assert!(store.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reingest_cancels_previous_timer() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));

        session.ingest_token("first", 120).unwrap();
        session.ingest_token("second", 3600).unwrap();

        // The first token's timer would have fired at 60s
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(session.is_authenticated());
        assert_eq!(session.token().as_deref(), Some("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_cancels_timer_for_next_session() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));

        session.ingest_token("first", 120).unwrap();
        session.logout();
        assert_eq!(session.expiry_delay(), None);

        tokio::time::sleep(Duration::from_secs(30)).await;
        session.ingest_token("second", 3600).unwrap();

        // Past the first token's deadline
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(session.token().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_restore_expired_session_clears_storage() {
        let store = MemoryStore::new();
        persist(
            &store,
            "stale",
            Utc::now() - chrono::Duration::minutes(1),
            Some(r#"{"id": "old"}"#),
        );

        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        assert_eq!(session.restore(), SessionState::Unauthenticated);
        assert!(!session.is_authenticated());
        assert_eq!(session.token(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_restore_without_token_or_expiration() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        assert_eq!(session.restore(), SessionState::Unauthenticated);

        // Token without expiration is not a session
        store.set(TOKEN_KEY, "orphan").unwrap();
        assert_eq!(session.restore(), SessionState::Unauthenticated);
        assert!(store.is_empty());

        store.set(TOKEN_KEY, "orphan").unwrap();
        store.set(EXPIRATION_KEY, "tomorrow").unwrap();
        assert_eq!(session.restore(), SessionState::Unauthenticated);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_restore_valid_session_rearms_for_remaining_time() {
        let store = MemoryStore::new();
        persist(&store, "kept", Utc::now() + chrono::Duration::seconds(600), None);

        let profiles = ScriptedProfiles::new(Outcome::Profile);
        let calls = Arc::clone(&profiles.calls);
        let session = manager(&store, profiles);

        assert_eq!(session.restore(), SessionState::Authenticated);
        assert_eq!(session.token().as_deref(), Some("kept"));
        assert!(session.is_authenticated());

        let delay = session.expiry_delay().expect("Timer should be armed");
        assert!(delay <= Duration::from_secs(600));
        assert!(delay >= Duration::from_secs(598));

        session.settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.user().map(|u| u.id), Some("user-kept".to_string()));
    }

    #[tokio::test]
    async fn test_restore_drops_corrupt_profile_but_keeps_token() {
        let store = MemoryStore::new();
        persist(
            &store,
            "kept",
            Utc::now() + chrono::Duration::hours(1),
            Some("{not json"),
        );

        let (profiles, _gate) = ScriptedProfiles::gated(Outcome::Profile);
        let session = manager(&store, profiles);

        assert_eq!(session.restore(), SessionState::Authenticated);
        assert_eq!(session.token().as_deref(), Some("kept"));
        assert_eq!(session.user(), None);
        assert_eq!(store.get(CACHED_USER_KEY).unwrap(), None);
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_restore_uses_cached_profile() {
        let store = MemoryStore::new();
        persist(
            &store,
            "kept",
            Utc::now() + chrono::Duration::hours(1),
            Some(r#"{"id": "cached", "display_name": "From Cache"}"#),
        );

        let (profiles, _gate) = ScriptedProfiles::gated(Outcome::Profile);
        let session = manager(&store, profiles);
        session.restore();

        // Available before validation completes
        assert_eq!(
            session.user().map(|u| u.display_label().to_string()),
            Some("From Cache".to_string())
        );
    }

    #[tokio::test]
    async fn test_ingest_then_restore_round_trip() {
        let store = MemoryStore::new();
        let first = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        first.ingest_token("abc123", 3600).unwrap();
        first.settle().await;
        let original_expiry = first.expires_at().unwrap();

        // Simulated reload: a new manager over the same storage
        let reloaded = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        assert_eq!(reloaded.restore(), SessionState::Authenticated);
        assert_eq!(reloaded.token().as_deref(), Some("abc123"));

        let restored_expiry = reloaded.expires_at().unwrap();
        assert!((original_expiry - restored_expiry).num_milliseconds().abs() < 1000);
        assert_eq!(reloaded.user().map(|u| u.id), Some("user-abc123".to_string()));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        session.restore();

        let before = session.snapshot();
        session.logout();
        session.logout();
        assert_eq!(session.snapshot(), before);
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        session.ingest_token("abc123", 3600).unwrap();
        session.settle().await;

        session.logout();
        assert_eq!(session.token(), None);
        assert_eq!(session.user(), None);
        assert_eq!(session.expires_at(), None);
        assert_eq!(session.expiry_delay(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_profile_after_logout_is_discarded() {
        let store = MemoryStore::new();
        let (profiles, gate) = ScriptedProfiles::gated(Outcome::Profile);
        let session = manager(&store, profiles);

        session.ingest_token("abc123", 3600).unwrap();
        session.logout();
        gate.notify_one();
        session.settle().await;

        assert_eq!(session.user(), None);
        assert!(!session.is_authenticated());
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_profile_for_replaced_token_is_discarded() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::RejectToken("first")));

        session.ingest_token("first", 3600).unwrap();
        session.ingest_token("second", 3600).unwrap();
        session.settle().await;
        tokio::task::yield_now().await;

        // The first token's 401 must not end the session that replaced it
        assert_eq!(session.token().as_deref(), Some("second"));
        assert!(session.is_authenticated());
        assert_eq!(session.user().map(|u| u.id), Some("user-second".to_string()));
    }

    #[tokio::test]
    async fn test_unauthorized_profile_logs_out() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Unauthorized));

        session.ingest_token("abc123", 3600).unwrap();
        session.settle().await;

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.token(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_profile_logs_out() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Forbidden));

        session.ingest_token("abc123", 3600).unwrap();
        session.settle().await;

        assert!(!session.is_authenticated());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_transient_profile_error_keeps_session() {
        let store = MemoryStore::new();
        let profiles = ScriptedProfiles::new(Outcome::ServerError);
        let calls = Arc::clone(&profiles.calls);
        let session = manager(&store, profiles);

        session.ingest_token("abc123", 3600).unwrap();
        session.settle().await;

        assert!(session.is_authenticated());
        assert_eq!(session.user(), None);
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("abc123"));
        // No retry
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_redirect_callback_ingests() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        let navigator = RecordingNavigator::default();

        assert!(session.handle_redirect_callback("access_token=abc&expires_in=3600", &navigator));
        assert_eq!(session.token().as_deref(), Some("abc"));
        assert!(session.is_authenticated());
        assert_eq!(session.expiry_delay(), Some(Duration::from_secs(3540)));
        assert_eq!(*navigator.cleared.borrow(), 1);
    }

    #[tokio::test]
    async fn test_handle_redirect_callback_rejects_oversized_lifetime() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        session.restore();
        let navigator = RecordingNavigator::default();

        let fragment = format!("access_token=abc&expires_in={}", u64::MAX);
        assert!(!session.handle_redirect_callback(&fragment, &navigator));
        assert!(!session.is_authenticated());
        assert_eq!(session.token(), None);
        assert_eq!(*navigator.cleared.borrow(), 0);
        assert!(store.is_empty());

        // The longest accepted lifetime still arms a timer
        let fragment = format!("access_token=abc&expires_in={}", MAX_TOKEN_LIFETIME_SECS);
        assert!(session.handle_redirect_callback(&fragment, &navigator));
        assert_eq!(
            session.expiry_delay(),
            Some(Duration::from_secs(MAX_TOKEN_LIFETIME_SECS - 60))
        );
    }

    #[tokio::test]
    async fn test_restore_distant_expiration_arms_bounded_timer() {
        let store = MemoryStore::new();
        persist(&store, "kept", Utc::now() + chrono::Duration::days(365 * 100), None);

        let (profiles, _gate) = ScriptedProfiles::gated(Outcome::Profile);
        let session = manager(&store, profiles);

        assert_eq!(session.restore(), SessionState::Authenticated);
        assert_eq!(
            session.expiry_delay(),
            Some(Duration::from_secs(MAX_TOKEN_LIFETIME_SECS))
        );
    }

    #[tokio::test]
    async fn test_handle_redirect_callback_without_token_is_noop() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        session.restore();
        let navigator = RecordingNavigator::default();
        let before = session.snapshot();

        assert!(!session.handle_redirect_callback("", &navigator));
        assert!(!session.handle_redirect_callback("#state=abc", &navigator));
        assert!(!session.handle_redirect_callback("access_token=abc", &navigator));

        assert_eq!(session.snapshot(), before);
        assert_eq!(*navigator.cleared.borrow(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_login_navigates_to_consent_page() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        let navigator = RecordingNavigator::default();
        let config = Config {
            client_id: Some("my-client".to_string()),
            redirect_uri: Some("http://127.0.0.1:8888/callback/".to_string()),
            ..Default::default()
        };

        session.login(&config, &navigator).unwrap();

        let visited = navigator.visited.borrow();
        assert_eq!(visited.len(), 1);
        assert!(visited[0].starts_with("https://accounts.spotify.com/authorize?client_id=my-client"));
        assert!(visited[0].contains("callback&scope="));
    }

    #[tokio::test]
    async fn test_login_without_client_id_fails_loudly() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        let navigator = RecordingNavigator::default();

        let result = session.login(&Config::default(), &navigator);
        assert_eq!(result, Err(AuthError::MissingClientId));
        assert!(navigator.visited.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_api_authorization_error_ends_session() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        session.ingest_token("abc123", 3600).unwrap();
        session.settle().await;

        assert!(!session.handle_api_error("abc123", &ApiError::RateLimited));
        assert!(session.is_authenticated());

        assert!(session.handle_api_error("abc123", &ApiError::Unauthorized));
        assert!(!session.is_authenticated());
        assert!(store.is_empty());

        // Nothing left to end
        assert!(!session.handle_api_error("abc123", &ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_api_error_for_replaced_token_keeps_new_session() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        session.ingest_token("old", 3600).unwrap();
        session.ingest_token("new", 3600).unwrap();
        session.settle().await;

        // A request built before re-login fails after the new token is active
        assert!(!session.handle_api_error("old", &ApiError::Unauthorized));
        assert!(session.is_authenticated());
        assert_eq!(session.token().as_deref(), Some("new"));
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("new"));

        assert!(session.handle_api_error("new", &ApiError::AccessDenied("revoked".into())));
        assert!(!session.is_authenticated());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = MemoryStore::new();
        let session = manager(&store, ScriptedProfiles::new(Outcome::Profile));
        let mut updates = session.subscribe();
        assert_eq!(updates.borrow().state, SessionState::Restoring);

        session.restore();
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().state, SessionState::Unauthenticated);

        session.ingest_token("abc123", 3600).unwrap();
        assert!(updates.borrow_and_update().is_authenticated);

        session.settle().await;
        assert!(updates.borrow_and_update().user.is_some());
    }
}
