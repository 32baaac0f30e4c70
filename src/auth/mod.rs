// Authentication Module
// OpenID Connect login with stateless, encrypted cookie sessions

pub mod config;
pub mod error;
pub mod middleware;
pub mod provider;
pub mod routes;
pub mod session;

use axum::{
    extract::Request,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{MethodRouter, get},
};
use std::sync::Arc;

pub use config::{AuthConfig, AuthRoutes, AuthorizationParams, SessionConfig};
pub use error::AuthError;
pub use middleware::{OidcContext, attach_session, requires_auth};
pub use provider::{IdentityProvider, OidcProvider, TokenSet, UserClaims};
pub use session::{AppSession, AuthVerification, CookieCodec, SessionCookies};

/// The identity middleware.
///
/// Owns the provider and the session cookies, and hands out the login,
/// logout and callback handlers plus the session guard so the route table
/// can wire them explicitly.
#[derive(Clone)]
pub struct Auth {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    config: AuthConfig,
    provider: Arc<dyn IdentityProvider>,
    cookies: SessionCookies,
}

impl Auth {
    pub fn new(config: AuthConfig, provider: Arc<dyn IdentityProvider>) -> Self {
        let cookies = SessionCookies::new(&config.secret, config.session.clone());
        Self {
            inner: Arc::new(AuthInner {
                config,
                provider,
                cookies,
            }),
        }
    }

    /// Identity middleware talking to the issuer in `config` via discovery
    pub fn from_config(config: AuthConfig) -> Result<Self, AuthError> {
        let provider = OidcProvider::new(&config)?;
        Ok(Self::new(config, Arc::new(provider)))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    pub fn provider(&self) -> &dyn IdentityProvider {
        self.inner.provider.as_ref()
    }

    pub fn cookies(&self) -> &SessionCookies {
        &self.inner.cookies
    }

    /// GET handler that starts the login redirect
    pub fn login_handler<S>(&self) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        get(routes::login).with_state(self.clone())
    }

    /// GET handler that clears the session and optionally ends it at the IdP
    pub fn logout_handler<S>(&self) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        get(routes::logout).with_state(self.clone())
    }

    /// GET handler that completes the code exchange and opens the session
    pub fn callback_handler<S>(&self) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        get(routes::callback).with_state(self.clone())
    }

    /// Session guard. Passes when `attach_session` found a valid session,
    /// otherwise yields a redirect to the login route.
    pub fn require_session(&self, req: &Request) -> Result<(), Response> {
        let authenticated = req
            .extensions()
            .get::<OidcContext>()
            .is_some_and(OidcContext::is_authenticated);

        if authenticated {
            return Ok(());
        }

        let return_to = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        tracing::debug!("No session for {}, redirecting to login", return_to);
        Err(self.login_redirect(return_to))
    }

    /// Redirect to the login route, coming back to `return_to` afterwards
    pub fn login_redirect(&self, return_to: &str) -> Response {
        let encoded: String = url::form_urlencoded::byte_serialize(return_to.as_bytes()).collect();
        found(&format!("{}?returnTo={}", self.config().routes.login, encoded))
    }
}

/// 302 Found, the status browsers and IdPs expect from a login flow
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
