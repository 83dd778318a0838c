use super::util::*;
use crate::domain_model::*;
use crate::domain_port::{ProfileError, ProfileRepo};
use reqwest::Response;

/// `ProfileRepo` over the REST interface of the `users` table.
pub struct PostgrestProfileRepo {
    http: reqwest::Client,
    backend: BackendConfig,
}

impl PostgrestProfileRepo {
    pub fn new(http: reqwest::Client, backend: BackendConfig) -> Self {
        PostgrestProfileRepo { http, backend }
    }

    async fn rows(response: Response) -> Result<Vec<User>, ProfileError> {
        if !response.status().is_success() {
            return Err(ProfileError::Store(provider_error(response).await.message));
        }
        response
            .json::<Vec<User>>()
            .await
            .map_err(|e| ProfileError::Store(format!("decode users: {e}")))
    }
}

#[async_trait::async_trait]
impl ProfileRepo for PostgrestProfileRepo {
    async fn get_by_id(&self, session: Option<&Session>, id: UserId) -> Result<User, ProfileError> {
        let id = id.to_string();
        let request = self
            .http
            .get(self.backend.endpoint("/rest/v1/users"))
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())]);
        let response = self
            .backend
            .authorize(request, session.map(|s| s.access_token.as_str()))
            .send()
            .await
            .map_err(|e| ProfileError::Store(transport_error(e).message))?;

        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or(ProfileError::NotFound)
    }

    async fn create(&self, session: Option<&Session>, user: &NewUser) -> Result<User, ProfileError> {
        let request = self
            .http
            .post(self.backend.endpoint("/rest/v1/users"))
            .header("Prefer", "return=representation")
            .json(user);
        let response = self
            .backend
            .authorize(request, session.map(|s| s.access_token.as_str()))
            .send()
            .await
            .map_err(|e| ProfileError::Store(transport_error(e).message))?;

        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProfileError::Store("insert returned no row".to_string()))
    }
}
