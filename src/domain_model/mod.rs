mod session;
mod storage;
mod user;

pub use session::*;
pub use storage::*;
pub use user::*;
