use super::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "topcat", about = "Top Cat account client")]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the current auth state (default)
    Status,
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        username: String,
    },
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    SignOut,
    ResetPassword {
        #[arg(long)]
        email: String,
    },
    Refresh,
    /// Finish a redirect from an email link, e.g. `topcat://reset?code=...`
    Callback { url: String },
    /// Create the missing profile for the signed-in account
    CompleteRegistration {
        #[arg(long)]
        username: String,
    },
    /// Show which storage backend holds the session
    Storage,
    /// Remove corrupted auth entries from storage
    StorageCleanup,
}
