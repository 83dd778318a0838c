mod auth_controller;
mod pkce;
mod safe_storage;
mod session_client_impl;

pub use auth_controller::*;
pub use pkce::*;
pub use safe_storage::*;
pub use session_client_impl::*;
