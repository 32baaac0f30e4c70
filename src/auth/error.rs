// Authentication Error Types
// Errors raised by the OIDC handshake and the session cookie codec

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    // OIDC-related errors
    #[error("OIDC discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Identity provider returned an error: {error}: {description}")]
    ProviderError { error: String, description: String },

    #[error("Invalid OAuth2 state parameter")]
    InvalidState,

    #[error("Missing authorization code in callback")]
    MissingCode,

    #[error("Authentication flow not started or verification cookie expired")]
    MissingVerification,

    #[error("Authorization code exchange failed: {0}")]
    CodeExchangeFailed(String),

    #[error("ID token verification failed: {0}")]
    TokenVerificationFailed(String),

    #[error("Invalid return URL: {0}")]
    InvalidReturnUrl(String),

    // Session cookie errors
    #[error("Session cookie could not be decrypted")]
    InvalidSessionCookie,

    #[error("Encryption error: {0}")]
    Encryption(String),

    // Configuration errors
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    // Network/HTTP errors
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),

    #[error("Provider communication timeout")]
    Timeout,
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::JsonError(err.to_string())
    }
}

// HTTP status code mapping for error responses
impl AuthError {
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::ProviderError { .. }
            | AuthError::InvalidState
            | AuthError::MissingCode
            | AuthError::MissingVerification
            | AuthError::InvalidReturnUrl(_) => 400,

            AuthError::TokenVerificationFailed(_)
            | AuthError::InvalidSessionCookie => 401,

            AuthError::DiscoveryFailed(_)
            | AuthError::CodeExchangeFailed(_)
            | AuthError::HttpError(_) => 502,

            AuthError::Timeout => 504,

            AuthError::Encryption(_) | AuthError::InvalidConfig { .. } | AuthError::JsonError(_) => {
                500
            }
        }
    }
}
