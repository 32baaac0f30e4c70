// Authentication Configuration
// What the identity middleware needs from Settings, validated up front

use std::time::Duration;

use super::error::AuthError;
use crate::config::Settings;

/// Identity middleware configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Require a session on every route, not just the guarded ones
    pub auth_required: bool,

    /// Terminate the session at the IdP on logout
    pub auth0_logout: bool,

    /// Key material for the session and verification cookies
    pub secret: String,

    /// Externally reachable origin, without trailing slash
    pub base_url: String,

    pub client_id: String,
    pub client_secret: String,
    pub issuer_base_url: String,

    pub authorization_params: AuthorizationParams,

    pub routes: AuthRoutes,

    pub session: SessionConfig,
}

/// Parameters sent to the authorization endpoint
#[derive(Debug, Clone)]
pub struct AuthorizationParams {
    pub response_type: String,
    pub scope: String,
}

impl AuthorizationParams {
    /// Scopes split on whitespace, in the configured order
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }
}

/// Paths of the routes the middleware owns
#[derive(Debug, Clone)]
pub struct AuthRoutes {
    pub login: String,
    pub logout: String,
    pub callback: String,
}

impl Default for AuthRoutes {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            logout: "/logout".to_string(),
            callback: "/callback".to_string(),
        }
    }
}

impl AuthRoutes {
    pub fn contains(&self, path: &str) -> bool {
        path == self.login || path == self.logout || path == self.callback
    }
}

/// Session cookie configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cookie name; chunks are named `{name}.0`, `{name}.1`, ...
    pub name: String,

    /// Idle lifetime, extended on every authenticated request
    pub rolling_duration: Duration,

    /// Hard cap counted from login
    pub absolute_duration: Duration,

    pub secure: bool,
}

impl AuthConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, AuthError> {
        let config = Self {
            auth_required: settings.auth_required,
            auth0_logout: settings.auth0_logout,
            secret: settings.secret.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            issuer_base_url: settings.issuer_base_url.clone(),
            authorization_params: AuthorizationParams {
                response_type: settings.response_type.clone(),
                scope: settings.scope.clone(),
            },
            routes: AuthRoutes::default(),
            session: SessionConfig {
                name: settings.session_name.clone(),
                rolling_duration: Duration::from_secs(settings.rolling_duration_secs),
                absolute_duration: Duration::from_secs(settings.absolute_duration_secs),
                secure: settings.cookie_secure(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.secret.is_empty() {
            return Err(AuthError::InvalidConfig {
                key: "secret".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        if self.authorization_params.response_type != "code" {
            return Err(AuthError::InvalidConfig {
                key: "authorization_params.response_type".to_string(),
                reason: "only the authorization code flow (\"code\") is supported".to_string(),
            });
        }

        if !self.authorization_params.scopes().any(|s| s == "openid") {
            return Err(AuthError::InvalidConfig {
                key: "authorization_params.scope".to_string(),
                reason: "must include \"openid\"".to_string(),
            });
        }

        if self.client_secret.is_empty() {
            return Err(AuthError::InvalidConfig {
                key: "client_secret".to_string(),
                reason: "required for the authorization code flow".to_string(),
            });
        }

        if self.session.name.is_empty() || self.session.name.contains(['=', ';', ' ']) {
            return Err(AuthError::InvalidConfig {
                key: "session.name".to_string(),
                reason: "must be a non-empty cookie name".to_string(),
            });
        }

        Ok(())
    }

    /// Redirect URI registered with the IdP
    pub fn redirect_uri(&self) -> String {
        format!("{}{}", self.base_url, self.routes.callback)
    }
}
