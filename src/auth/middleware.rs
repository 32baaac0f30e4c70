/// Authentication Middleware
///
/// `attach_session` runs on every request: it decrypts the session cookie,
/// exposes the result as an `OidcContext` request extension and rolls the
/// session expiry forward. `requires_auth` is the per-route guard.
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use std::convert::Infallible;

use super::Auth;
use super::provider::UserClaims;
use super::session::AppSession;

/// Static assets stay reachable even when every route requires a session
const STATIC_PREFIX: &str = "/static/";

/// Authentication state of the current request
#[derive(Debug, Clone, Default)]
pub struct OidcContext {
    session: Option<AppSession>,
}

impl OidcContext {
    pub fn new(session: Option<AppSession>) -> Self {
        Self { session }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn user(&self) -> Option<&UserClaims> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn id_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id_token.as_str())
    }

    pub fn session(&self) -> Option<&AppSession> {
        self.session.as_ref()
    }
}

impl<S> FromRequestParts<S> for OidcContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Routes mounted without attach_session just see an anonymous request
        Ok(parts
            .extensions
            .get::<OidcContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Session middleware for the whole app
pub async fn attach_session(State(auth): State<Auth>, mut req: Request, next: Next) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    let session = auth.cookies().read(&jar);

    let path = req.uri().path();
    let is_auth_route = auth.config().routes.contains(path);
    let is_public = is_auth_route || path.starts_with(STATIC_PREFIX);

    req.extensions_mut()
        .insert(OidcContext::new(session.clone()));

    if auth.config().auth_required && !is_public {
        if let Err(redirect) = auth.require_session(&req) {
            return redirect;
        }
    }

    let mut response = next.run(req).await;

    // Auth routes manage the session cookie themselves
    if let Some(mut session) = session
        && !is_auth_route
    {
        session.touch();
        match auth.cookies().write(&jar, &session) {
            Ok(cookies) => append_cookies(&mut response, cookies),
            Err(e) => tracing::warn!("Failed to refresh session cookie: {}", e),
        }
    }

    response
}

/// Route guard: redirects to login unless the request has a session
pub async fn requires_auth(State(auth): State<Auth>, req: Request, next: Next) -> Response {
    match auth.require_session(&req) {
        Ok(()) => next.run(req).await,
        Err(redirect) => redirect,
    }
}

fn append_cookies(response: &mut Response, cookies: Vec<Cookie<'static>>) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!("Dropping unencodable cookie {}: {}", cookie.name(), e),
        }
    }
}
