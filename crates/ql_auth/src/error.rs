//! Error types for account sessions

use std::fmt::Display;

use ql_core::{IoError, JsonError, RequestError};

use crate::token_store::TokenStoreError;

/// Errors from session operations.
///
/// - [`AuthError::InvalidInput`]: rejected before anything happened
/// - [`AuthError::Cancelled`]: the operation was aborted, nothing changed
/// - everything else from a provider: the auth server or
///   network failed, nothing changed
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("JSON error: {0}")]
    Json(#[from] JsonError),

    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("Incorrect or expired credentials: {0}")]
    InvalidCredentials(String),

    #[error("Two-factor authentication required")]
    TwoFactorRequired,

    #[error("{service} rejected the request: {message}")]
    Rejected { service: String, message: String },

    #[error("Auth provider error: {0}")]
    Provider(String),

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("{operation} isn't supported for {service:?} accounts")]
    UnsupportedOperation {
        operation: &'static str,
        service: String,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Game profile {profile} not found in account {account}")]
    ProfileNotFound { account: String, profile: String },

    #[error("Unknown authentication service: {0}")]
    UnknownService(String),

    #[error("Invalid identity endpoint {url}: {reason}")]
    Endpoint { url: String, reason: String },

    #[error("Token storage error: {0}")]
    TokenStorage(#[from] TokenStoreError),
}

impl AuthError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AuthError::Cancelled)
    }

    /// The auth server says the stored credentials are no good,
    /// the user has to log in again.
    #[must_use]
    pub fn needs_relogin(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials(_) | AuthError::TwoFactorRequired
        )
    }
}

/// Convenient type alias for Results in account sessions
pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub struct KeyringError(pub keyring::Error);

impl Display for KeyringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Account keyring error:")?;
        match &self.0 {
            #[cfg(target_os = "linux")]
            keyring::Error::PlatformFailure(error)
                if error.to_string().contains("The name is not activatable") =>
            {
                write!(f, "{error}\n\nInstall gnome-keyring and libsecret\n(package names differ between distros)")
            }
            #[cfg(target_os = "linux")]
            keyring::Error::NoStorageAccess(error)
                if error.to_string().contains("no result found") =>
            {
                write!(
                    f,
                    r#"{error}

Your keyring is missing or locked. Open "seahorse" and
make sure a "Login" keyring exists, is unlocked,
and is set as default (right-click -> Set as Default)"#
                )
            }

            _ => write!(f, "{}", self.0),
        }
    }
}
