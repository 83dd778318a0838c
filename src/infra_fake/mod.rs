//! In-process implementations of every domain port. Used by the tests and by
//! the `fake` auth backend.

mod auth_provider_fake;
mod profile_repo_fake;
mod storage_fake;

pub use auth_provider_fake::*;
pub use profile_repo_fake::*;
pub use storage_fake::*;
