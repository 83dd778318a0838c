use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::{ProfileError, ProfileRepo};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEMO_EMAIL: &str = "demo@topcat.local";
pub const DEMO_USERNAME: &str = "demo_user";

const CONFIRM_EMAIL_MESSAGE: &str = "Check your email to confirm your account, then sign in.";
const PASSWORD_RECOVERY_MESSAGE: &str = "Signed in from a recovery link. Set a new password.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileFetchError {
    /// Credential exists but the `users` row was never written.
    Incomplete,
    SessionExpired(String),
    Failed(String),
}

type ProfileFetch = Shared<BoxFuture<'static, Result<User, ProfileFetchError>>>;

enum Backend {
    Demo,
    Live {
        client: Arc<dyn SessionClient>,
        profiles: Arc<dyn ProfileRepo>,
    },
}

/// Owner of the app-wide auth state.
///
/// Consumers read snapshots or watch for changes. Every mutation goes
/// through the operations below. After `teardown` no further state is
/// applied.
pub struct AuthController {
    backend: Backend,
    state: watch::Sender<AuthState>,
    inflight: DashMap<UserId, ProfileFetch>,
    /// Bumped by every session establishment and sign-out. Only the latest
    /// establishment may write its result.
    epoch: AtomicU64,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AuthController {
    pub fn new(client: Arc<dyn SessionClient>, profiles: Arc<dyn ProfileRepo>) -> Arc<Self> {
        Arc::new(Self::with_backend(Backend::Live { client, profiles }))
    }

    /// Controller for a build without backend credentials. It never makes
    /// remote calls and is not a security boundary.
    pub fn demo() -> Arc<Self> {
        Arc::new(Self::with_backend(Backend::Demo))
    }

    fn with_backend(backend: Backend) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        AuthController {
            backend,
            state,
            inflight: DashMap::new(),
            epoch: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            listener: Mutex::new(None),
        }
    }

    pub fn is_demo(&self) -> bool {
        matches!(self.backend, Backend::Demo)
    }

    pub fn snapshot(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn storage_info(&self) -> StorageInfo {
        match &self.backend {
            Backend::Demo => StorageInfo {
                kind: StorageKind::Memory,
                available: false,
            },
            Backend::Live { client, .. } => client.storage_info(),
        }
    }

    fn live(&self) -> Result<(&Arc<dyn SessionClient>, &Arc<dyn ProfileRepo>), AuthError> {
        match &self.backend {
            Backend::Demo => Err(AuthError::DemoMode),
            Backend::Live { client, profiles } => Ok((client, profiles)),
        }
    }

    // region state

    fn apply(&self, f: impl FnOnce(&mut AuthState)) {
        if self.cancel.is_cancelled() {
            debug!("controller torn down, dropping state update");
            return;
        }
        self.state.send_modify(f);
    }

    /// Replace the whole state, keeping the current notice unless `next`
    /// brings its own.
    fn replace(&self, next: AuthState) {
        self.apply(|state| {
            let notice = next.notice.clone().or_else(|| state.notice.take());
            debug!(from = ?state.phase, to = ?next.phase, "auth transition");
            *state = AuthState { notice, ..next };
        });
    }

    fn begin(&self) {
        self.apply(|state| {
            state.loading = true;
            state.error = None;
        });
    }

    fn fail(&self, error: &AuthError) {
        let message = error.friendly();
        self.apply(|state| {
            state.loading = false;
            state.error = Some(message);
        });
    }

    /// Invalidates every `establish_session` still in flight.
    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Waits until the state leaves `Uninitialized`/`Loading`, or the
    /// controller is torn down.
    pub async fn settled(&self) -> AuthState {
        let mut rx = self.state.subscribe();
        tokio::select! {
            result = rx.wait_for(|s| {
                !matches!(s.phase, AuthPhase::Uninitialized | AuthPhase::Loading)
            }) => match result {
                Ok(state) => state.clone(),
                Err(_) => self.snapshot(),
            },
            _ = self.cancel.cancelled() => self.snapshot(),
        }
    }

    // endregion

    // region startup

    /// Runs once per process: demo shortcut, storage diagnostics, session
    /// lookup, then the auth event listener.
    pub async fn initialize(self: &Arc<Self>) {
        let client = match &self.backend {
            Backend::Demo => {
                info!("no backend configured, running in demo mode");
                self.replace(demo_state());
                return;
            }
            Backend::Live { client, .. } => client.clone(),
        };

        let info = client.storage_info();
        let notice = if info.available {
            None
        } else {
            warn!(?info, "persistent storage unavailable, session will not survive a restart");
            Some(STORAGE_DEGRADED_MESSAGE.to_string())
        };
        self.apply(|state| {
            state.phase = AuthPhase::Loading;
            state.loading = true;
            state.notice = notice;
        });

        // Subscribe before reading the session so a refresh during the read
        // is not missed; the two paths share one profile fetch.
        self.spawn_listener(client.on_auth_state_change());
        self.load_session(client.as_ref()).await;
    }

    /// Errored -> Loading -> session lookup again.
    pub async fn retry(self: &Arc<Self>) {
        let Ok((client, _)) = self.live() else {
            return;
        };
        if self.snapshot().phase != AuthPhase::Errored {
            debug!("retry ignored outside of errored state");
            return;
        }
        self.apply(|state| {
            state.phase = AuthPhase::Loading;
            state.loading = true;
            state.error = None;
        });
        let client = client.clone();
        self.load_session(client.as_ref()).await;
    }

    async fn load_session(&self, client: &dyn SessionClient) {
        match client.get_session().await {
            Ok(Some(session)) => self.establish_session(session).await,
            Ok(None) => self.replace(AuthState::signed_out(None)),
            Err(e) => self.recover_from_session_error(&e).await,
        }
    }

    async fn recover_from_session_error(&self, error: &AuthError) {
        let Ok((client, _)) = self.live() else {
            return;
        };
        self.bump_epoch();

        match error.kind() {
            AuthErrorKind::RefreshTokenInvalid => {
                info!(error = %error, "session expired, signing out");
                if let Err(e) = client.sign_out(SignOutScope::Global).await {
                    warn!(error = %e, "remote sign-out after expiry failed");
                }
                self.replace(AuthState::errored(None, SESSION_EXPIRED_MESSAGE));
            }
            AuthErrorKind::StorageRestricted => {
                warn!(error = %error, "storage restricted, continuing without a session");
                self.replace(AuthState::signed_out(Some(
                    STORAGE_DEGRADED_MESSAGE.to_string(),
                )));
            }
            _ => {
                error!(error = %error, "failed to initialize auth session");
                self.replace(AuthState::errored(None, INIT_FAILED_MESSAGE));
            }
        }
    }

    fn spawn_listener(self: &Arc<Self>, mut subscription: AuthSubscription) {
        let Ok(mut slot) = self.listener.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) => this.handle_event(event).await,
                        None => break,
                    },
                }
            }
            debug!("auth event listener stopped");
        }));
    }

    async fn handle_event(&self, event: AuthEvent) {
        let Ok((client, _)) = self.live() else {
            return;
        };
        debug!(event = ?event.event, "auth state change");

        match (event.event, event.session) {
            (AuthChangeEvent::SignedOut, _) | (_, None) => {
                // Our own sign-out paths already cleared the state and may
                // have left a message that must survive.
                let current = self.snapshot();
                if current.session.is_none() && current.user.is_none() {
                    return;
                }
                self.bump_epoch();
                self.replace(AuthState::signed_out(None));
            }
            (kind, Some(session)) => {
                if kind == AuthChangeEvent::PasswordRecovery {
                    self.apply(|state| {
                        state.notice = Some(PASSWORD_RECOVERY_MESSAGE.to_string())
                    });
                }

                let current = self.snapshot();
                let same_session = current.session.as_ref().map(|s| &s.access_token)
                    == Some(&session.access_token);
                if current.phase == AuthPhase::Authenticated && same_session {
                    return;
                }

                // Events are handled after the fact; only the stored session
                // (last writer wins) may be established.
                match client.get_session().await {
                    Ok(Some(stored)) if stored.access_token == session.access_token => {
                        self.establish_session(session).await
                    }
                    _ => debug!(event = ?kind, "ignoring stale auth event"),
                }
            }
        }
    }

    // endregion

    // region session establishment

    /// Shared by startup, events and operations. Only the most recently
    /// started establishment may apply its result; an older one for the same
    /// session may have read the profile before it existed.
    async fn establish_session(&self, session: Session) {
        let epoch = self.bump_epoch();
        let subject = session.subject();
        let result = self.fetch_profile(&session).await;

        if !self.is_current(epoch) {
            debug!(%subject, "session establishment superseded");
            return;
        }

        match result {
            Ok(user) if user.id == subject => {
                debug!(%subject, "session established");
                self.replace(AuthState {
                    phase: AuthPhase::Authenticated,
                    user: Some(user),
                    session: Some(session),
                    loading: false,
                    error: None,
                    notice: None,
                });
            }
            Ok(user) => {
                warn!(%subject, profile = %user.id, "profile id does not match session subject");
                self.replace(AuthState::errored(Some(session), PROFILE_MISMATCH_MESSAGE));
            }
            Err(ProfileFetchError::Incomplete) => {
                self.replace(AuthState::errored(Some(session), PROFILE_INCOMPLETE_MESSAGE));
            }
            Err(ProfileFetchError::SessionExpired(message)) => {
                let error = AuthError::Provider {
                    kind: AuthErrorKind::RefreshTokenInvalid,
                    message,
                };
                self.recover_from_session_error(&error).await;
            }
            Err(ProfileFetchError::Failed(_)) => {
                self.replace(AuthState::errored(Some(session), PROFILE_LOAD_FAILED_MESSAGE));
            }
        }
    }

    /// Concurrent fetches for one subject share a single request.
    async fn fetch_profile(&self, session: &Session) -> Result<User, ProfileFetchError> {
        let profiles = match &self.backend {
            Backend::Live { profiles, .. } => profiles.clone(),
            Backend::Demo => return Err(ProfileFetchError::Failed("demo mode".to_string())),
        };
        let subject = session.subject();

        let fetch = self
            .inflight
            .entry(subject)
            .or_insert_with(|| {
                let session = session.clone();
                async move { fetch_profile_by_id(profiles.as_ref(), &session).await }
                    .boxed()
                    .shared()
            })
            .value()
            .clone();

        let result = fetch.clone().await;
        self.inflight
            .remove_if(&subject, |_, current| current.ptr_eq(&fetch));
        result
    }

    // endregion

    // region operations

    /// Creates the credential, then the `users` row. A failed row insert is
    /// reported but the credential is kept; `complete_registration` finishes
    /// the job after the next sign-in.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let (client, profiles) = self.live()?;
        self.begin();

        let outcome = match client.sign_up(email, password, username).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        let new_user = NewUser {
            id: outcome.user.id,
            email: email.to_string(),
            username: username.to_string(),
        };
        if let Err(e) = profiles.create(outcome.session.as_ref(), &new_user).await {
            warn!(user_id = %new_user.id, error = %e, "credential created but profile insert failed");
            let error = AuthError::Profile(e.to_string());
            self.apply(|state| {
                state.loading = false;
                state.error = Some(format!(
                    "Account created, but setting up your profile failed ({e}). \
                     Sign in to finish registration."
                ));
            });
            return Err(error);
        }

        match &outcome.session {
            Some(session) => {
                // Drop any fetch that raced ahead of the insert.
                self.inflight.remove(&session.subject());
                self.establish_session(session.clone()).await;
            }
            None => self.apply(|state| {
                state.loading = false;
                state.notice = Some(CONFIRM_EMAIL_MESSAGE.to_string());
            }),
        }
        Ok(outcome)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let (client, _) = self.live()?;
        self.begin();

        match client.sign_in(email, password).await {
            Ok(session) => {
                self.establish_session(session.clone()).await;
                Ok(session)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Local state is cleared whatever the provider says.
    pub async fn sign_out(&self) {
        self.bump_epoch();
        if let Ok((client, _)) = self.live() {
            if let Err(e) = client.sign_out(SignOutScope::Global).await {
                warn!(error = %e, "remote sign-out failed, local state cleared anyway");
            }
        }
        self.replace(AuthState::signed_out(None));
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let (client, _) = self.live()?;
        self.begin();

        match client.reset_password(email).await {
            Ok(()) => {
                self.apply(|state| {
                    state.loading = false;
                    state.notice = Some(RESET_EMAIL_SENT_MESSAGE.to_string());
                });
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    pub async fn refresh_session(&self) -> Result<(), AuthError> {
        let (client, _) = self.live()?;

        let error = match client.refresh_session().await {
            Ok(session) => {
                self.establish_session(session).await;
                return Ok(());
            }
            Err(e) => e,
        };

        match error.kind() {
            AuthErrorKind::RefreshTokenInvalid => {
                self.bump_epoch();
                if let Err(e) = client.sign_out(SignOutScope::Global).await {
                    warn!(error = %e, "remote sign-out after expiry failed");
                }
                self.replace(AuthState::errored(None, SESSION_EXPIRED_MESSAGE));
            }
            AuthErrorKind::StorageRestricted => {
                warn!(error = %error, "refresh hit restricted storage");
                self.apply(|state| state.notice = Some(STORAGE_DEGRADED_MESSAGE.to_string()));
            }
            _ => {
                warn!(error = %error, "session refresh failed, signing out locally");
                self.bump_epoch();
                if let Err(e) = client.sign_out(SignOutScope::Local).await {
                    warn!(error = %e, "local sign-out failed");
                }
                self.replace(AuthState::errored(None, SIGN_IN_AGAIN_MESSAGE));
            }
        }
        Err(error)
    }

    /// Writes the missing `users` row for the signed-in account.
    pub async fn complete_registration(&self, username: &str) -> Result<User, AuthError> {
        let (_, profiles) = self.live()?;
        let session = self.snapshot().session.ok_or(AuthError::SessionMissing)?;
        self.begin();

        let new_user = NewUser {
            id: session.subject(),
            email: session.user.email.clone().unwrap_or_default(),
            username: username.to_string(),
        };
        let user = match profiles.create(Some(&session), &new_user).await {
            Ok(user) => user,
            Err(e) => {
                let error = AuthError::Profile(e.to_string());
                self.fail(&error);
                return Err(error);
            }
        };

        self.inflight.remove(&session.subject());
        self.establish_session(session).await;
        Ok(user)
    }

    /// Finishes a redirect back from an email link. `Ok(false)` when the URL
    /// carried no auth code.
    pub async fn exchange_code(&self, url: &str) -> Result<bool, AuthError> {
        let (client, _) = self.live()?;
        self.begin();

        match client.detect_session_in_url(url).await {
            Ok(Some(session)) => {
                self.establish_session(session).await;
                Ok(true)
            }
            Ok(None) => {
                self.apply(|state| state.loading = false);
                Ok(false)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    pub async fn cleanup_storage(&self) -> Vec<String> {
        match self.live() {
            Ok((client, _)) => client.cleanup_storage().await,
            Err(_) => Vec::new(),
        }
    }

    pub fn clear_error(&self) {
        self.apply(|state| state.error = None);
    }

    // endregion

    /// Stops the event listener. State is frozen afterwards.
    pub async fn teardown(&self) {
        self.cancel.cancel();
        let handle = self.listener.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let r = handle.await;
            debug!("auth listener dropped: {:?}", r);
        }
    }
}

async fn fetch_profile_by_id(
    profiles: &dyn ProfileRepo,
    session: &Session,
) -> Result<User, ProfileFetchError> {
    let subject = session.subject();
    match profiles.get_by_id(Some(session), subject).await {
        Ok(user) => Ok(user),
        Err(ProfileError::NotFound) => {
            info!(%subject, "no profile row, registration incomplete");
            Err(ProfileFetchError::Incomplete)
        }
        Err(ProfileError::Store(message)) => {
            if classify(&message) == AuthErrorKind::RefreshTokenInvalid {
                Err(ProfileFetchError::SessionExpired(message))
            } else {
                warn!(%subject, error = %message, "profile fetch failed");
                Err(ProfileFetchError::Failed(message))
            }
        }
    }
}

fn demo_user() -> User {
    User {
        id: UserId::nil(),
        email: DEMO_EMAIL.to_string(),
        username: DEMO_USERNAME.to_string(),
        profile_pic: None,
        created_at: DateTime::<Utc>::default(),
    }
}

fn demo_state() -> AuthState {
    AuthState {
        phase: AuthPhase::Authenticated,
        user: Some(demo_user()),
        session: None,
        loading: false,
        error: None,
        notice: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{RealSessionClient, SafeStorage, SessionClientConfig};
    use crate::infra_fake::*;
    use std::time::Duration;

    const EMAIL: &str = "a@b.com";
    const PASSWORD: &str = "secret1";

    struct Harness {
        provider: Arc<FakeAuthProvider>,
        profiles: Arc<FakeProfileRepo>,
        backend: Arc<FakeStorage>,
        client: Arc<RealSessionClient>,
        controller: Arc<AuthController>,
    }

    async fn harness_with(backend: Arc<FakeStorage>) -> Harness {
        let provider = Arc::new(FakeAuthProvider::new());
        let profiles = Arc::new(FakeProfileRepo::new());
        let storage = Arc::new(SafeStorage::probe(backend.clone()).await);
        let client = Arc::new(RealSessionClient::new(
            provider.clone(),
            storage,
            SessionClientConfig::for_backend_url("https://test.supabase.co"),
        ));
        let controller = AuthController::new(client.clone(), profiles.clone());
        Harness {
            provider,
            profiles,
            backend,
            client,
            controller,
        }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(FakeStorage::new())).await
    }

    fn profile(id: UserId, username: &str) -> User {
        User {
            id,
            email: EMAIL.to_string(),
            username: username.to_string(),
            profile_pic: None,
            created_at: Utc::now(),
        }
    }

    impl Harness {
        /// Registered account with a profile row.
        fn account(&self) -> UserId {
            let id = self.provider.add_account(EMAIL, PASSWORD);
            self.profiles.insert(profile(id, "whiskers"));
            id
        }

        /// Session already in storage, as left by a previous run.
        async fn stored_session(&self, expires_in: i64) {
            self.provider.set_expires_in(expires_in);
            self.client.sign_in(EMAIL, PASSWORD).await.unwrap();
            self.provider.set_expires_in(3600);
        }
    }

    #[tokio::test]
    async fn demo_mode_yields_placeholder_user() {
        let controller = AuthController::demo();
        controller.initialize().await;

        let state = controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Authenticated);
        assert!(!state.loading);
        assert_eq!(state.user.as_ref().map(|u| u.email.as_str()), Some(DEMO_EMAIL));
        assert_eq!(state.user.map(|u| u.id), Some(UserId::nil()));
        assert!(controller.is_demo());

        assert!(matches!(
            controller.sign_in(EMAIL, PASSWORD).await,
            Err(AuthError::DemoMode)
        ));
    }

    #[tokio::test]
    async fn initialize_without_session_is_unauthenticated() {
        let h = harness().await;
        h.controller.initialize().await;

        let state = h.controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Unauthenticated);
        assert!(!state.loading);
        assert_eq!(state.user, None);
        assert_eq!(state.notice, None);
    }

    #[tokio::test]
    async fn initialize_restores_stored_session() {
        let h = harness().await;
        let id = h.account();
        h.stored_session(3600).await;

        h.controller.initialize().await;
        let state = h.controller.settled().await;
        assert_eq!(state.phase, AuthPhase::Authenticated);
        assert_eq!(state.user.map(|u| u.id), Some(id));
        assert_eq!(state.session.map(|s| s.subject()), Some(id));
    }

    #[tokio::test]
    async fn refresh_token_not_found_on_startup_forces_sign_out() {
        let h = harness().await;
        h.account();
        h.stored_session(10).await;
        h.provider
            .fail_next(FakeCall::Refresh, "Invalid Refresh Token: Refresh Token Not Found");

        h.controller.initialize().await;
        let state = h.controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Errored);
        assert_eq!(state.user, None);
        assert_eq!(state.session, None);
        assert_eq!(state.error.as_deref(), Some(SESSION_EXPIRED_MESSAGE));
        assert_eq!(h.backend.peek("sb-test-auth-token"), None);
        assert!(h.provider.calls().contains(&FakeCall::SignOut));
    }

    #[tokio::test]
    async fn storage_restricted_error_continues_unauthenticated() {
        let h = harness().await;
        h.account();
        h.stored_session(10).await;
        h.provider
            .fail_next(FakeCall::Refresh, "SecurityError: storage access denied");

        h.controller.initialize().await;
        let state = h.controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Unauthenticated);
        assert_eq!(state.error, None);
        assert_eq!(state.notice.as_deref(), Some(STORAGE_DEGRADED_MESSAGE));
    }

    #[tokio::test]
    async fn blocked_storage_is_reported_but_not_fatal() {
        let h = harness_with(Arc::new(FakeStorage::failing())).await;
        h.account();

        h.controller.initialize().await;
        assert_eq!(h.controller.storage_info().kind, StorageKind::Memory);
        let state = h.controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Unauthenticated);
        assert_eq!(state.notice.as_deref(), Some(STORAGE_DEGRADED_MESSAGE));

        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();
        assert!(h.controller.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn unclassified_startup_error_waits_for_retry() {
        let h = harness().await;
        let id = h.account();
        h.stored_session(10).await;
        h.provider
            .fail_next(FakeCall::Refresh, "network error: connection refused");

        h.controller.initialize().await;
        let state = h.controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Errored);
        assert_eq!(state.error.as_deref(), Some(INIT_FAILED_MESSAGE));

        h.controller.retry().await;
        let state = h.controller.settled().await;
        assert_eq!(state.phase, AuthPhase::Authenticated);
        assert_eq!(state.user.map(|u| u.id), Some(id));
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn wrong_password_surfaces_friendly_error() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;

        let err = h.controller.sign_in(EMAIL, "wrongpass").await.unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::InvalidCredentials);

        let state = h.controller.snapshot();
        assert!(state.error.unwrap().contains("Invalid email or password"));
        assert_eq!(state.user, None);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn sign_in_authenticates() {
        let h = harness().await;
        let id = h.account();
        h.controller.initialize().await;

        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();
        let state = h.controller.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.user.map(|u| u.username), Some("whiskers".to_string()));
        assert_eq!(state.session.map(|s| s.subject()), Some(id));
    }

    #[tokio::test]
    async fn missing_profile_row_is_incomplete_registration() {
        let h = harness().await;
        let id = h.provider.add_account(EMAIL, PASSWORD);
        h.controller.initialize().await;

        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();
        let state = h.controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Errored);
        assert_eq!(state.user, None);
        assert_eq!(state.error.as_deref(), Some(PROFILE_INCOMPLETE_MESSAGE));

        let user = h.controller.complete_registration("whiskers").await.unwrap();
        assert_eq!(user.id, id);
        let state = h.controller.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn profile_store_failure_is_a_generic_load_error() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;
        h.profiles
            .fail_next_get(ProfileError::Store("connection reset by peer".to_string()));

        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();
        let state = h.controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Errored);
        assert_eq!(state.user, None);
        assert_eq!(state.error.as_deref(), Some(PROFILE_LOAD_FAILED_MESSAGE));
    }

    #[tokio::test]
    async fn refresh_token_error_during_profile_fetch_uses_global_recovery() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;
        h.profiles.fail_next_get(ProfileError::Store(
            "Invalid Refresh Token: Refresh Token Not Found".to_string(),
        ));

        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();
        let state = h.controller.snapshot();
        assert_eq!(state.user, None);
        assert_eq!(state.session, None);
        assert_eq!(state.error.as_deref(), Some(SESSION_EXPIRED_MESSAGE));
        assert!(h.provider.calls().contains(&FakeCall::SignOut));
    }

    #[tokio::test]
    async fn profile_for_another_subject_is_rejected() {
        let h = harness().await;
        let id = h.provider.add_account(EMAIL, PASSWORD);
        let other = UserId(uuid::Uuid::new_v4());
        h.profiles.insert_at(id, profile(other, "impostor"));
        h.controller.initialize().await;

        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();
        let state = h.controller.snapshot();
        assert_eq!(state.user, None);
        assert_eq!(state.error.as_deref(), Some(PROFILE_MISMATCH_MESSAGE));
    }

    #[tokio::test]
    async fn sign_out_clears_state_when_remote_rejects() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;
        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();

        h.provider.fail_next(FakeCall::SignOut, "network error: timed out");
        h.controller.sign_out().await;

        let state = h.controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Unauthenticated);
        assert_eq!(state.user, None);
        assert_eq!(state.session, None);
        assert_eq!(state.error, None);
        assert_eq!(h.client.get_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn sign_up_creates_profile_and_signs_in() {
        let h = harness().await;
        h.controller.initialize().await;

        let outcome = h
            .controller
            .sign_up(EMAIL, PASSWORD, "whiskers")
            .await
            .unwrap();
        assert!(outcome.session.is_some());
        assert_eq!(
            h.profiles.get(outcome.user.id).map(|u| u.username),
            Some("whiskers".to_string())
        );
        assert!(h.controller.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn slow_lookup_started_before_profile_insert_cannot_undo_sign_up() {
        let h = harness().await;
        h.controller.initialize().await;
        // The listener reacts to SignedIn while the insert is in flight and
        // its lookup answers after sign-up has finished.
        h.profiles.set_create_delay(Duration::from_millis(20));
        h.profiles.delay_next_get(Duration::from_millis(100));

        h.controller
            .sign_up(EMAIL, PASSWORD, "whiskers")
            .await
            .unwrap();
        assert!(h.controller.snapshot().is_authenticated());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let state = h.controller.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.error, None);
        assert_eq!(h.profiles.fetch_count(), 2);
    }

    #[tokio::test]
    async fn sign_up_with_email_confirmation_leaves_notice() {
        let h = harness().await;
        h.provider.set_confirm_email(true);
        h.controller.initialize().await;

        let outcome = h
            .controller
            .sign_up(EMAIL, PASSWORD, "whiskers")
            .await
            .unwrap();
        assert!(outcome.session.is_none());
        let state = h.controller.snapshot();
        assert_eq!(state.phase, AuthPhase::Unauthenticated);
        assert!(state.notice.is_some());
        assert!(h.profiles.get(outcome.user.id).is_some());
    }

    #[tokio::test]
    async fn sign_up_profile_failure_keeps_credential() {
        let h = harness().await;
        h.controller.initialize().await;
        h.profiles
            .fail_next_create(ProfileError::Store("permission denied for table users".into()));

        let err = h
            .controller
            .sign_up(EMAIL, PASSWORD, "whiskers")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Profile(_)));
        let state = h.controller.snapshot();
        assert_eq!(state.user, None);
        assert!(state.error.unwrap().contains("finish registration"));

        // The credential survived: signing in works and lands in the
        // incomplete-registration state.
        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();
        assert_eq!(
            h.controller.snapshot().error.as_deref(),
            Some(PROFILE_INCOMPLETE_MESSAGE)
        );
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_translated() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;

        let err = h
            .controller
            .sign_up(EMAIL, PASSWORD, "whiskers")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::UserAlreadyRegistered);
        assert!(h.controller.snapshot().error.unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn reset_password_confirms() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;

        h.controller.reset_password(EMAIL).await.unwrap();
        let state = h.controller.snapshot();
        assert_eq!(state.notice.as_deref(), Some(RESET_EMAIL_SENT_MESSAGE));
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn recovery_link_signs_in() {
        let h = harness().await;
        let id = h.account();
        h.controller.initialize().await;
        h.controller.reset_password(EMAIL).await.unwrap();

        let code = h.provider.last_recovery_code().unwrap();
        let exchanged = h
            .controller
            .exchange_code(&format!("topcat://reset-password?code={code}"))
            .await
            .unwrap();
        assert!(exchanged);
        let state = h.controller.snapshot();
        assert_eq!(state.user.map(|u| u.id), Some(id));
    }

    #[tokio::test]
    async fn refresh_session_rotates_tokens() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;
        let first = h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();

        h.controller.refresh_session().await.unwrap();
        let state = h.controller.snapshot();
        assert!(state.is_authenticated());
        assert_ne!(state.session.unwrap().refresh_token, first.refresh_token);
    }

    #[tokio::test]
    async fn refresh_session_with_dead_token_signs_out() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;
        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();

        h.provider
            .fail_next(FakeCall::Refresh, "Invalid Refresh Token: Already Used");
        let err = h.controller.refresh_session().await.unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::RefreshTokenInvalid);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let state = h.controller.snapshot();
        assert_eq!(state.session, None);
        assert_eq!(state.user, None);
        assert_eq!(state.error.as_deref(), Some(SESSION_EXPIRED_MESSAGE));
        assert!(h.provider.calls().contains(&FakeCall::SignOut));
    }

    #[tokio::test]
    async fn refresh_session_storage_error_keeps_session() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;
        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();

        h.provider
            .fail_next(FakeCall::Refresh, "QuotaExceededError: storage is full");
        assert!(h.controller.refresh_session().await.is_err());

        let state = h.controller.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.notice.as_deref(), Some(STORAGE_DEGRADED_MESSAGE));
        assert!(!h.provider.calls().contains(&FakeCall::SignOut));
    }

    #[tokio::test]
    async fn refresh_session_other_error_signs_out_locally() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;
        h.controller.sign_in(EMAIL, PASSWORD).await.unwrap();

        h.provider
            .fail_next(FakeCall::Refresh, "network error: connection refused");
        assert!(h.controller.refresh_session().await.is_err());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let state = h.controller.snapshot();
        assert_eq!(state.session, None);
        assert_eq!(state.error.as_deref(), Some(SIGN_IN_AGAIN_MESSAGE));
        assert!(!h.provider.calls().contains(&FakeCall::SignOut));
    }

    #[tokio::test]
    async fn clear_error_is_idempotent() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;
        h.controller.sign_in(EMAIL, "wrongpass").await.unwrap_err();
        assert!(h.controller.snapshot().error.is_some());

        h.controller.clear_error();
        let once = h.controller.snapshot();
        h.controller.clear_error();
        let twice = h.controller.snapshot();
        assert_eq!(once.error, None);
        assert_eq!(once, twice);
        assert_eq!(twice.user, None);
        assert_eq!(twice.session, None);
    }

    #[tokio::test]
    async fn startup_and_refresh_event_share_one_profile_fetch() {
        let h = harness().await;
        let id = h.account();
        h.stored_session(10).await;
        h.profiles.set_delay(Duration::from_millis(50));

        h.controller.initialize().await;
        let state = h.controller.settled().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(state.user.map(|u| u.id), Some(id));
        assert_eq!(h.profiles.fetch_count(), 1);
    }

    #[tokio::test]
    async fn events_after_teardown_are_ignored() {
        let h = harness().await;
        h.account();
        h.controller.initialize().await;
        h.controller.teardown().await;

        h.client.sign_in(EMAIL, PASSWORD).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Unauthenticated);

        assert_eq!(h.controller.settled().await.phase, AuthPhase::Unauthenticated);
    }
}
