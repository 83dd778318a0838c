mod gotrue_auth_provider;
mod postgrest_profile_repo;
mod util;

pub use gotrue_auth_provider::*;
pub use postgrest_profile_repo::*;
pub use util::BackendConfig;
