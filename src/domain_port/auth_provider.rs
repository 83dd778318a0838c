use crate::domain_model::*;

/// Error as reported by the remote auth provider. Only the message text is
/// meaningful; see `classify` for how it is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        ProviderError {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SignUpResponse {
    pub user: AuthUser,
    /// Absent when the provider requires email confirmation first.
    pub session: Option<Session>,
}

#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUpResponse, ProviderError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<Session, ProviderError>;

    /// Revoke the session behind `access_token` on the provider side.
    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError>;

    /// Send a password recovery email. `code_challenge` is the S256 PKCE challenge.
    async fn recover(&self, email: &str, code_challenge: &str) -> Result<(), ProviderError>;

    async fn exchange_code(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<Session, ProviderError>;
}
