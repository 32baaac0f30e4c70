/// Authentication Routes
///
/// Login initiation, callback processing and logout for the OIDC
/// authorization code flow.
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use url::Url;

use super::error::AuthError;
use super::session::{AppSession, AuthVerification};
use super::{Auth, found};

/// Login initiation parameters
#[derive(Debug, Deserialize)]
pub struct LoginParams {
    /// Relative path to land on after login
    #[serde(rename = "returnTo")]
    return_to: Option<String>,
}

/// OAuth2 callback parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code from provider
    code: Option<String>,

    /// CSRF state token
    state: Option<String>,

    /// Error from provider
    error: Option<String>,

    /// Error description from provider
    error_description: Option<String>,
}

/// Logout parameters
#[derive(Debug, Deserialize)]
pub struct LogoutParams {
    /// Relative path to land on after logout
    #[serde(rename = "returnTo")]
    return_to: Option<String>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!("Authentication failed: {}", self);
        } else {
            tracing::warn!("Authentication rejected: {}", self);
        }

        (status, self.to_string()).into_response()
    }
}

/// Random URL-safe token for state and nonce values
fn random_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Only same-origin relative paths are accepted as return targets. The
/// query may carry anything, including absolute URLs.
fn validate_return_url(url: &str) -> Result<(), AuthError> {
    let invalid = || AuthError::InvalidReturnUrl(url.to_string());

    if !url.starts_with('/') || url.starts_with("//") || url.contains('\\') {
        return Err(invalid());
    }

    let base = Url::parse("http://localhost").map_err(|_| invalid())?;
    let resolved = base.join(url).map_err(|_| invalid())?;
    if resolved.host_str() != Some("localhost") {
        return Err(invalid());
    }

    Ok(())
}

/// Start the authorization code flow - redirects to the provider
pub async fn login(
    State(auth): State<Auth>,
    jar: CookieJar,
    Query(params): Query<LoginParams>,
) -> Result<Response, AuthError> {
    let return_to = params.return_to.unwrap_or_else(|| "/".to_string());
    validate_return_url(&return_to)?;

    let verification = AuthVerification {
        state: random_token(),
        nonce: random_token(),
        return_to,
    };

    let auth_url = auth
        .provider()
        .authorization_url(&verification.state, &verification.nonce)
        .await?;

    let cookie = auth.cookies().write_verification(&verification)?;
    tracing::debug!("Redirecting to identity provider for login");

    Ok((jar.add(cookie), found(auth_url.as_str())).into_response())
}

/// Handle the provider's redirect back with an authorization code.
///
/// The verification cookie is single use: it is cleared whether the login
/// completes or fails.
pub async fn callback(
    State(auth): State<Auth>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    match complete_login(&auth, &jar, params).await {
        Ok(response) => response,
        Err(e) => (jar.add(auth.cookies().clear_verification()), e).into_response(),
    }
}

async fn complete_login(
    auth: &Auth,
    jar: &CookieJar,
    params: CallbackParams,
) -> Result<Response, AuthError> {
    if let Some(error) = params.error {
        return Err(AuthError::ProviderError {
            error,
            description: params
                .error_description
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }

    let verification = auth.cookies().read_verification(jar)?;

    let state = params.state.ok_or(AuthError::InvalidState)?;
    if !bool::from(state.as_bytes().ct_eq(verification.state.as_bytes())) {
        return Err(AuthError::InvalidState);
    }

    let code = params.code.ok_or(AuthError::MissingCode)?;

    let tokens = auth
        .provider()
        .exchange_code(&code, &verification.nonce)
        .await?;

    let session = AppSession::new(
        tokens.claims,
        tokens.id_token,
        tokens.access_token,
        auth.cookies().config(),
    );
    let session_cookies = auth.cookies().write(jar, &session)?;

    tracing::info!("User {} logged in", session.user.sub);

    let jar = session_cookies
        .into_iter()
        .fold(jar.clone().add(auth.cookies().clear_verification()), |jar, c| {
            jar.add(c)
        });

    Ok((jar, found(&verification.return_to)).into_response())
}

/// Logout handler - clears the session, then ends it at the IdP if configured
pub async fn logout(
    State(auth): State<Auth>,
    jar: CookieJar,
    Query(params): Query<LogoutParams>,
) -> Result<Response, AuthError> {
    let base_url = &auth.config().base_url;
    let return_to = match params.return_to {
        Some(path) => {
            validate_return_url(&path)?;
            format!("{}{}", base_url, path)
        }
        None => base_url.clone(),
    };

    let session = auth.cookies().read(&jar);
    let removals = auth.cookies().clear(&jar);
    let jar = removals.into_iter().fold(jar, |jar, c| jar.add(c));

    let Some(session) = session else {
        tracing::debug!("Logout called without a session");
        return Ok((jar, found(&return_to)).into_response());
    };

    tracing::info!("User {} logged out", session.user.sub);

    let target = match auth.provider().logout_url(&return_to)? {
        Some(url) => url.to_string(),
        None => return_to,
    };

    Ok((jar, found(&target)).into_response())
}
