use crate::application_impl::generate_code_challenge;
use crate::domain_model::*;
use crate::domain_port::{AuthProvider, ProviderError, SignUpResponse};
use chrono::Utc;
use dashmap::DashMap;
use nanoid::nanoid;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeCall {
    SignUp,
    SignIn,
    Refresh,
    SignOut,
    Recover,
    ExchangeCode,
}

#[derive(Debug, Clone)]
struct FakeAccount {
    id: UserId,
    password: String,
}

/// Auth provider living entirely in memory, speaking the same error texts as
/// the hosted one.
#[derive(Debug)]
pub struct FakeAuthProvider {
    accounts: DashMap<String, FakeAccount>,
    refresh_tokens: DashMap<String, AuthUser>,
    recovery_codes: DashMap<String, (AuthUser, String)>,
    last_recovery_code: Mutex<Option<String>>,
    failures: Mutex<HashMap<FakeCall, VecDeque<ProviderError>>>,
    calls: Mutex<Vec<FakeCall>>,
    confirm_email: AtomicBool,
    expires_in: AtomicI64,
}

impl Default for FakeAuthProvider {
    fn default() -> Self {
        FakeAuthProvider {
            accounts: DashMap::new(),
            refresh_tokens: DashMap::new(),
            recovery_codes: DashMap::new(),
            last_recovery_code: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            confirm_email: AtomicBool::new(false),
            expires_in: AtomicI64::new(3600),
        }
    }
}

impl FakeAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, email: &str, password: &str) -> UserId {
        let id = fake_id(email);
        self.accounts.insert(
            email.to_string(),
            FakeAccount {
                id,
                password: password.to_string(),
            },
        );
        id
    }

    /// Queue an error for the next call of the given kind.
    pub fn fail_next(&self, call: FakeCall, message: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures
                .entry(call)
                .or_default()
                .push_back(ProviderError::new(message));
        }
    }

    /// Sign-ups return no session until the email is confirmed.
    pub fn set_confirm_email(&self, required: bool) {
        self.confirm_email.store(required, Ordering::SeqCst);
    }

    pub fn set_expires_in(&self, secs: i64) {
        self.expires_in.store(secs, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn last_recovery_code(&self) -> Option<String> {
        self.last_recovery_code.lock().ok().and_then(|c| c.clone())
    }

    /// Mint a session the provider will accept on refresh.
    pub fn issue_session(&self, user: AuthUser) -> Session {
        let refresh_token = format!("fake-refresh-token:{}", nanoid!(16));
        self.refresh_tokens.insert(refresh_token.clone(), user.clone());
        Session {
            access_token: format!("fake-access-token:{}", uuid::Uuid::new_v4()),
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: self.expires_in.load(Ordering::SeqCst),
            expires_at: None,
            user,
        }
        .with_expiry_from(Utc::now())
    }

    fn enter(&self, call: FakeCall) -> Result<(), ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        let failure = self
            .failures
            .lock()
            .ok()
            .and_then(|mut f| f.get_mut(&call).and_then(|q| q.pop_front()));
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for FakeAuthProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _username: &str,
    ) -> Result<SignUpResponse, ProviderError> {
        self.enter(FakeCall::SignUp)?;

        if self.accounts.contains_key(email) {
            return Err(ProviderError::new("User already registered").with_status(422));
        }
        if password.len() < 6 {
            return Err(
                ProviderError::new("Password should be at least 6 characters.").with_status(422),
            );
        }

        let id = self.add_account(email, password);
        let user = AuthUser {
            id,
            email: Some(email.to_string()),
        };
        let session = if self.confirm_email.load(Ordering::SeqCst) {
            None
        } else {
            Some(self.issue_session(user.clone()))
        };
        Ok(SignUpResponse { user, session })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError> {
        self.enter(FakeCall::SignIn)?;

        let account = self
            .accounts
            .get(email)
            .map(|a| a.value().clone())
            .filter(|a| a.password == password)
            .ok_or_else(|| ProviderError::new("Invalid login credentials").with_status(400))?;

        Ok(self.issue_session(AuthUser {
            id: account.id,
            email: Some(email.to_string()),
        }))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        self.enter(FakeCall::Refresh)?;

        // Rotation: a refresh token is single use.
        let (_, user) = self.refresh_tokens.remove(refresh_token).ok_or_else(|| {
            ProviderError::new("Invalid Refresh Token: Refresh Token Not Found").with_status(400)
        })?;
        Ok(self.issue_session(user))
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), ProviderError> {
        self.enter(FakeCall::SignOut)
    }

    async fn recover(&self, email: &str, code_challenge: &str) -> Result<(), ProviderError> {
        self.enter(FakeCall::Recover)?;

        // Unknown addresses succeed silently, like the hosted provider.
        if let Some(account) = self.accounts.get(email) {
            let code = nanoid!(24);
            let user = AuthUser {
                id: account.id,
                email: Some(email.to_string()),
            };
            self.recovery_codes
                .insert(code.clone(), (user, code_challenge.to_string()));
            if let Ok(mut last) = self.last_recovery_code.lock() {
                *last = Some(code);
            }
        }
        Ok(())
    }

    async fn exchange_code(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<Session, ProviderError> {
        self.enter(FakeCall::ExchangeCode)?;

        let (_, (user, challenge)) = self.recovery_codes.remove(auth_code).ok_or_else(|| {
            ProviderError::new("invalid flow state, no valid flow state found").with_status(404)
        })?;
        if generate_code_challenge(code_verifier) != challenge {
            return Err(ProviderError::new(
                "code challenge does not match previously saved code verifier",
            )
            .with_status(403));
        }
        Ok(self.issue_session(user))
    }
}

fn fake_id(email: &str) -> UserId {
    UserId(uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, email.as_bytes()))
}
