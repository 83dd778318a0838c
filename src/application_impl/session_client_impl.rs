use crate::application_impl::{SafeStorage, generate_code_challenge, generate_code_verifier};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::{AuthProvider, ProviderError};
use chrono::{Duration, Utc};
use reqwest::Url;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAP: usize = 16;
const RECOVERY_MARKER: &str = "PASSWORD_RECOVERY";

#[derive(Debug, Clone)]
pub struct SessionClientConfig {
    pub storage_key: String,
    pub auto_refresh: bool,
    pub detect_session_in_url: bool,
    pub refresh_margin: Duration,
}

impl SessionClientConfig {
    /// Default options with the storage key namespaced to the backend project.
    pub fn for_backend_url(url: &str) -> Self {
        SessionClientConfig {
            storage_key: format!("sb-{}-auth-token", project_ref(url)),
            auto_refresh: true,
            detect_session_in_url: true,
            refresh_margin: Duration::seconds(60),
        }
    }
}

/// First label of the backend host, e.g. `abcd` for `https://abcd.supabase.co`.
pub fn project_ref(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.split('.').next().unwrap_or(h).to_string()))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

pub struct RealSessionClient {
    provider: Arc<dyn AuthProvider>,
    storage: Arc<SafeStorage>,
    config: SessionClientConfig,
    events: broadcast::Sender<AuthEvent>,
    /// Access token of a session dropped after its refresh token was
    /// rejected. A global sign-out still revokes it.
    unrevoked: Mutex<Option<String>>,
}

impl RealSessionClient {
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        storage: Arc<SafeStorage>,
        config: SessionClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAP);
        RealSessionClient {
            provider,
            storage,
            config,
            events,
            unrevoked: Mutex::new(None),
        }
    }

    fn verifier_key(&self) -> String {
        format!("{}-code-verifier", self.config.storage_key)
    }

    async fn load_session(&self) -> Option<Session> {
        let raw = self
            .storage
            .get_item(&self.config.storage_key)
            .await
            .into_inner()?;
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "discarding unreadable stored session");
                self.storage.remove_item(&self.config.storage_key).await;
                None
            }
        }
    }

    async fn save_session(&self, session: &Session) {
        self.take_unrevoked();
        match serde_json::to_string(session) {
            Ok(raw) => {
                let stored = self.storage.set_item(&self.config.storage_key, &raw).await;
                if stored.is_degraded() {
                    debug!("session held in memory only");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize session"),
        }
    }

    async fn remove_session(&self) {
        self.storage.remove_item(&self.config.storage_key).await;
    }

    fn take_unrevoked(&self) -> Option<String> {
        self.unrevoked.lock().ok().and_then(|mut slot| slot.take())
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        // No subscribers is fine.
        let _ = self.events.send(AuthEvent { event, session });
    }

    async fn refresh_with(&self, current: &Session) -> Result<Session, AuthError> {
        match self.provider.refresh_token(&current.refresh_token).await {
            Ok(session) => {
                let session = session.with_expiry_from(Utc::now());
                self.save_session(&session).await;
                self.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
                Ok(session)
            }
            Err(e) => {
                let error = AuthError::from(e);
                if error.kind() == AuthErrorKind::RefreshTokenInvalid {
                    info!("refresh token rejected, dropping stored session");
                    self.remove_session().await;
                    if let Ok(mut slot) = self.unrevoked.lock() {
                        *slot = Some(current.access_token.clone());
                    }
                }
                Err(error)
            }
        }
    }

    async fn take_verifier(&self) -> Option<(String, bool)> {
        let key = self.verifier_key();
        let raw = self.storage.get_item(&key).await.into_inner()?;
        self.storage.remove_item(&key).await;
        match raw.split_once('/') {
            Some((verifier, marker)) => Some((verifier.to_string(), marker == RECOVERY_MARKER)),
            None => Some((raw, false)),
        }
    }
}

#[async_trait::async_trait]
impl SessionClient for RealSessionClient {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.load_session().await else {
            return Ok(None);
        };

        if self.config.auto_refresh && session.expires_within(Utc::now(), self.config.refresh_margin)
        {
            debug!("stored session is expiring, refreshing");
            return self.refresh_with(&session).await.map(Some);
        }
        Ok(Some(session))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let response = self.provider.sign_up(email, password, username).await?;
        if let Some(session) = &response.session {
            self.save_session(session).await;
            self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        }
        Ok(SignUpOutcome {
            user: response.user,
            session: response.session,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self
            .provider
            .sign_in_with_password(email, password)
            .await?
            .with_expiry_from(Utc::now());
        self.save_session(&session).await;
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), AuthError> {
        let stored = self.load_session().await.map(|s| s.access_token);
        let unrevoked = self.take_unrevoked();
        let remote = match (scope, stored.or(unrevoked)) {
            (SignOutScope::Global, Some(access_token)) => {
                self.provider.sign_out(&access_token).await
            }
            _ => Ok(()),
        };

        self.remove_session().await;
        self.storage.remove_item(&self.verifier_key()).await;
        self.emit(AuthChangeEvent::SignedOut, None);

        remote.map_err(AuthError::from)
    }

    async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        self.storage
            .set_item(&self.verifier_key(), &format!("{verifier}/{RECOVERY_MARKER}"))
            .await;

        self.provider.recover(email, &challenge).await?;
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.load_session().await.ok_or(AuthError::SessionMissing)?;
        self.refresh_with(&session).await
    }

    async fn exchange_code_for_session(&self, auth_code: &str) -> Result<Session, AuthError> {
        let (verifier, recovery) = self.take_verifier().await.ok_or_else(|| {
            AuthError::from(ProviderError::new("PKCE code verifier not found in storage"))
        })?;

        let session = self
            .provider
            .exchange_code(auth_code, &verifier)
            .await?
            .with_expiry_from(Utc::now());
        self.save_session(&session).await;

        let event = if recovery {
            AuthChangeEvent::PasswordRecovery
        } else {
            AuthChangeEvent::SignedIn
        };
        self.emit(event, Some(session.clone()));
        Ok(session)
    }

    async fn detect_session_in_url(&self, url: &str) -> Result<Option<Session>, AuthError> {
        if !self.config.detect_session_in_url {
            return Ok(None);
        }
        let Ok(url) = Url::parse(url) else {
            debug!(url, "not a callback url");
            return Ok(None);
        };

        let mut code = None;
        let mut error_description = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "code" => code = Some(value.into_owned()),
                "error_description" => error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(description) = error_description {
            return Err(ProviderError::new(description).into());
        }
        match code {
            Some(code) => self.exchange_code_for_session(&code).await.map(Some),
            None => Ok(None),
        }
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    fn storage_info(&self) -> StorageInfo {
        self.storage.info()
    }

    async fn cleanup_storage(&self) -> Vec<String> {
        self.storage.cleanup_corrupted().await
    }
}
