use crate::domain_port::ProviderError;

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";
pub const SIGN_IN_AGAIN_MESSAGE: &str = "Session refresh failed. Please sign in again.";
pub const STORAGE_DEGRADED_MESSAGE: &str =
    "Persistent storage is restricted. You will need to sign in again after restarting.";
pub const INIT_FAILED_MESSAGE: &str = "Failed to initialize authentication. Please try again.";
pub const PROFILE_INCOMPLETE_MESSAGE: &str =
    "Your account registration is incomplete. Please finish setting up your profile.";
pub const PROFILE_LOAD_FAILED_MESSAGE: &str = "Failed to load user profile. Please try again.";
pub const PROFILE_MISMATCH_MESSAGE: &str =
    "The loaded profile does not belong to the signed-in account.";
pub const RESET_EMAIL_SENT_MESSAGE: &str = "Password reset email sent. Check your inbox.";

/// Recoverable error categories the provider only reports as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    RefreshTokenInvalid,
    StorageRestricted,
    InvalidCredentials,
    UserAlreadyRegistered,
    WeakPassword,
    EmailNotConfirmed,
    RateLimited,
    SessionMissing,
    Other,
}

// Matched case-insensitively. Provider wording is not a stable contract, the
// tests below pin the exact strings observed so far.
const REFRESH_TOKEN_PHRASES: &[&str] = &[
    "invalid refresh token",
    "refresh token not found",
    "refresh_token_not_found",
    "refresh token already used",
];
const STORAGE_PHRASES: &[&str] = &[
    "storage access denied",
    "access to storage is not allowed",
    "localstorage",
    "securityerror",
    "quotaexceedederror",
];
const INVALID_CREDENTIALS_PHRASES: &[&str] = &["invalid login credentials"];
const USER_EXISTS_PHRASES: &[&str] = &["user already registered", "already been registered"];
const WEAK_PASSWORD_PHRASES: &[&str] = &["password should be at least"];
const EMAIL_NOT_CONFIRMED_PHRASES: &[&str] = &["email not confirmed"];
const RATE_LIMIT_PHRASES: &[&str] = &["rate limit", "too many requests"];
const SESSION_MISSING_PHRASES: &[&str] = &["auth session missing"];

pub fn classify(message: &str) -> AuthErrorKind {
    let message = message.to_lowercase();
    let matches = |phrases: &[&str]| phrases.iter().any(|p| message.contains(p));

    if matches(REFRESH_TOKEN_PHRASES) {
        AuthErrorKind::RefreshTokenInvalid
    } else if matches(STORAGE_PHRASES) {
        AuthErrorKind::StorageRestricted
    } else if matches(INVALID_CREDENTIALS_PHRASES) {
        AuthErrorKind::InvalidCredentials
    } else if matches(USER_EXISTS_PHRASES) {
        AuthErrorKind::UserAlreadyRegistered
    } else if matches(WEAK_PASSWORD_PHRASES) {
        AuthErrorKind::WeakPassword
    } else if matches(EMAIL_NOT_CONFIRMED_PHRASES) {
        AuthErrorKind::EmailNotConfirmed
    } else if matches(RATE_LIMIT_PHRASES) {
        AuthErrorKind::RateLimited
    } else if matches(SESSION_MISSING_PHRASES) {
        AuthErrorKind::SessionMissing
    } else {
        AuthErrorKind::Other
    }
}

/// Text shown to the user for a provider message. Unrecognized messages pass
/// through verbatim.
pub fn friendly_message(kind: AuthErrorKind, raw: &str) -> String {
    match kind {
        AuthErrorKind::InvalidCredentials => {
            "Invalid email or password. Please try again.".to_string()
        }
        AuthErrorKind::UserAlreadyRegistered => {
            "An account with this email already exists. Try signing in instead.".to_string()
        }
        AuthErrorKind::WeakPassword => "Password must be at least 6 characters long.".to_string(),
        AuthErrorKind::EmailNotConfirmed => {
            "Please confirm your email address before signing in.".to_string()
        }
        AuthErrorKind::RateLimited => {
            "Too many attempts. Please wait a moment and try again.".to_string()
        }
        AuthErrorKind::RefreshTokenInvalid => SESSION_EXPIRED_MESSAGE.to_string(),
        AuthErrorKind::StorageRestricted => STORAGE_DEGRADED_MESSAGE.to_string(),
        AuthErrorKind::SessionMissing | AuthErrorKind::Other => raw.to_string(),
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("{message}")]
    Provider {
        kind: AuthErrorKind,
        message: String,
    },
    #[error("Auth session missing!")]
    SessionMissing,
    #[error("profile error: {0}")]
    Profile(String),
    #[error("not available in demo mode")]
    DemoMode,
    #[error("internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::Provider { kind, .. } => *kind,
            AuthError::SessionMissing => AuthErrorKind::SessionMissing,
            _ => AuthErrorKind::Other,
        }
    }

    pub fn friendly(&self) -> String {
        match self {
            AuthError::Provider { kind, message } => friendly_message(*kind, message),
            other => other.to_string(),
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(error: ProviderError) -> Self {
        AuthError::Provider {
            kind: classify(&error.message),
            message: error.message,
        }
    }
}
