// store

mod persistent_storage;

pub use persistent_storage::*;

// remote

mod auth_provider;
mod profile_repo;

pub use auth_provider::*;
pub use profile_repo::*;
