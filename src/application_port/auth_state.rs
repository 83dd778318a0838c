use crate::domain_model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Uninitialized,
    Loading,
    Authenticated,
    Unauthenticated,
    Errored,
}

/// Snapshot of the auth state consumers render from.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub phase: AuthPhase,
    pub user: Option<User>,
    pub session: Option<Session>,
    pub loading: bool,
    pub error: Option<String>,
    /// Non-fatal information, e.g. degraded storage or a sent reset email.
    pub notice: Option<String>,
}

impl Default for AuthState {
    fn default() -> Self {
        AuthState {
            phase: AuthPhase::Uninitialized,
            user: None,
            session: None,
            loading: true,
            error: None,
            notice: None,
        }
    }
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::Authenticated && self.user.is_some()
    }

    pub(crate) fn signed_out(notice: Option<String>) -> Self {
        AuthState {
            phase: AuthPhase::Unauthenticated,
            loading: false,
            notice,
            ..AuthState::default()
        }
    }

    pub(crate) fn errored(session: Option<Session>, message: impl Into<String>) -> Self {
        AuthState {
            phase: AuthPhase::Errored,
            session,
            loading: false,
            error: Some(message.into()),
            ..AuthState::default()
        }
    }
}
