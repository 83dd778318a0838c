use crate::domain_model::*;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProfileError {
    #[error("profile not found")]
    NotFound,
    #[error("store error: {0}")]
    Store(String),
}

/// The remote `users` table.
#[async_trait::async_trait]
pub trait ProfileRepo: Send + Sync {
    /// `session` authorizes the request; `None` falls back to the anonymous key.
    async fn get_by_id(&self, session: Option<&Session>, id: UserId) -> Result<User, ProfileError>;

    async fn create(&self, session: Option<&Session>, user: &NewUser) -> Result<User, ProfileError>;
}
