mod auth_error;
mod auth_state;
mod session_client;

pub use auth_error::*;
pub use auth_state::*;
pub use session_client::*;
