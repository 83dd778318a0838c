use super::util::*;
use crate::domain_model::*;
use crate::domain_port::{AuthProvider, ProviderError, SignUpResponse};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// `AuthProvider` speaking the hosted auth REST API under `/auth/v1`.
pub struct GoTrueAuthProvider {
    http: reqwest::Client,
    backend: BackendConfig,
}

impl GoTrueAuthProvider {
    pub fn new(http: reqwest::Client, backend: BackendConfig) -> Self {
        GoTrueAuthProvider { http, backend }
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<T, ProviderError> {
        let request = self.http.post(self.backend.endpoint(path)).json(body);
        let response = self
            .backend
            .authorize(request, bearer)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }
        response.json::<T>().await.map_err(transport_error)
    }

    async fn token(&self, grant_type: &str, body: Value) -> Result<Session, ProviderError> {
        let session: Session = self
            .post(&format!("/auth/v1/token?grant_type={grant_type}"), &body, None)
            .await?;
        Ok(session.with_expiry_from(Utc::now()))
    }
}

#[async_trait::async_trait]
impl AuthProvider for GoTrueAuthProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUpResponse, ProviderError> {
        let body = json!({
            "email": email,
            "password": password,
            "data": { "username": username },
        });
        let value: Value = self.post("/auth/v1/signup", &body, None).await?;

        // With autoconfirm the provider answers with a session, otherwise
        // with the bare user awaiting confirmation.
        if value.get("access_token").is_some() {
            let session: Session = serde_json::from_value(value)
                .map_err(|e| ProviderError::new(format!("malformed session: {e}")))?;
            let session = session.with_expiry_from(Utc::now());
            Ok(SignUpResponse {
                user: session.user.clone(),
                session: Some(session),
            })
        } else {
            let user: AuthUser = serde_json::from_value(value)
                .map_err(|e| ProviderError::new(format!("malformed user: {e}")))?;
            Ok(SignUpResponse {
                user,
                session: None,
            })
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError> {
        self.token("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        self.token("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let request = self.http.post(self.backend.endpoint("/auth/v1/logout"));
        let response = self
            .backend
            .authorize(request, Some(access_token))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(provider_error(response).await)
        }
    }

    async fn recover(&self, email: &str, code_challenge: &str) -> Result<(), ProviderError> {
        let body = json!({
            "email": email,
            "code_challenge": code_challenge,
            "code_challenge_method": "s256",
        });
        let _: Value = self.post("/auth/v1/recover", &body, None).await?;
        Ok(())
    }

    async fn exchange_code(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<Session, ProviderError> {
        self.token(
            "pkce",
            json!({ "auth_code": auth_code, "code_verifier": code_verifier }),
        )
        .await
    }
}
