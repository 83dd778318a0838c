use crate::application_port::AuthError;
use crate::domain_model::*;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutScope {
    /// Clear the stored session only.
    Local,
    /// Also revoke the session on the provider.
    Global,
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    pub session: Option<Session>,
}

/// Handle returned by `SessionClient::on_auth_state_change`. Dropping it
/// unsubscribes.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    pub fn new(rx: broadcast::Receiver<AuthEvent>) -> Self {
        AuthSubscription { rx }
    }

    /// Next event, or `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auth event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[async_trait::async_trait]
pub trait SessionClient: Send + Sync {
    /// Never fails because of storage; provider errors (e.g. a dead refresh
    /// token during auto-refresh) are passed through.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUpOutcome, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// The local session is removed whatever the remote call returns.
    async fn sign_out(&self, scope: SignOutScope) -> Result<(), AuthError>;

    async fn reset_password(&self, email: &str) -> Result<(), AuthError>;

    async fn refresh_session(&self) -> Result<Session, AuthError>;

    async fn exchange_code_for_session(&self, auth_code: &str) -> Result<Session, AuthError>;

    /// Completes a redirect carrying `?code=`. `Ok(None)` when the URL holds
    /// nothing auth related or detection is turned off.
    async fn detect_session_in_url(&self, url: &str) -> Result<Option<Session>, AuthError>;

    fn on_auth_state_change(&self) -> AuthSubscription;

    fn storage_info(&self) -> StorageInfo;

    async fn cleanup_storage(&self) -> Vec<String>;
}
