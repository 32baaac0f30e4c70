use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Environment variables read into [`Settings`]. Anything else in the
/// process environment is ignored.
const ENV_KEYS: &[&str] = &[
    "SECRET",
    "BASE_URL",
    "CLIENT_ID",
    "CLIENT_SECRET",
    "ISSUER_BASE_URL",
    "PORT",
    "HOST",
    "STATIC_DIR",
    "AUTH_REQUIRED",
    "AUTH0_LOGOUT",
    "SCOPE",
    "RESPONSE_TYPE",
    "SESSION_NAME",
    "ROLLING_DURATION_SECS",
    "ABSOLUTE_DURATION_SECS",
    "COOKIE_SECURE",
];

/// Process-wide settings, loaded once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Key material for the session cookie. Keep it out of version control.
    pub secret: String,

    /// Externally reachable origin of this app
    #[serde(default = "default_base_url")]
    pub base_url: String,

    pub client_id: String,
    pub client_secret: String,

    /// IdP origin; discovery document lives under `/.well-known/`
    pub issuer_base_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Gate every route instead of only the ones behind `require_session`
    #[serde(default)]
    pub auth_required: bool,

    /// Also end the session at the IdP on logout
    #[serde(default = "default_true")]
    pub auth0_logout: bool,

    #[serde(default = "default_scope")]
    pub scope: String,

    #[serde(default = "default_response_type")]
    pub response_type: String,

    #[serde(default = "default_session_name")]
    pub session_name: String,

    #[serde(default = "default_rolling_duration")]
    pub rolling_duration_secs: u64,

    #[serde(default = "default_absolute_duration")]
    pub absolute_duration_secs: u64,

    /// `None` means "secure when base_url is https"
    #[serde(default)]
    pub cookie_secure: Option<bool>,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::load(None)
    }

    /// Load settings from an optional TOML file, overridden by the environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, AppError> {
        let mut figment = Figment::new();
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Settings = figment.merge(Env::raw().only(ENV_KEYS)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings that serde alone cannot check.
    pub fn validate(&self) -> Result<(), AppError> {
        require_non_empty("secret", &self.secret)?;
        require_non_empty("client_id", &self.client_id)?;
        require_non_empty("client_secret", &self.client_secret)?;
        require_http_url("base_url", &self.base_url)?;
        require_http_url("issuer_base_url", &self.issuer_base_url)?;

        if self.secret.len() < 32 {
            tracing::warn!("SECRET is shorter than 32 characters; use a long random value");
        }

        if self.rolling_duration_secs == 0 || self.absolute_duration_secs == 0 {
            return Err(AppError::InvalidConfig {
                key: "rolling_duration_secs".to_string(),
                reason: "session durations must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether cookies carry the `Secure` attribute.
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
            .unwrap_or_else(|| self.base_url.starts_with("https://"))
    }

    /// Settings for tests: loopback host, fixed secret, provider at `issuer`.
    pub fn test_config_with_port(port: u16, issuer: &str) -> Self {
        Settings {
            secret: "a-test-secret-that-is-long-enough-0123456789".to_string(),
            base_url: format!("http://127.0.0.1:{}", port),
            client_id: "test-client".to_string(),
            client_secret: "test-client-secret".to_string(),
            issuer_base_url: issuer.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            static_dir: default_static_dir(),
            auth_required: false,
            auth0_logout: true,
            scope: default_scope(),
            response_type: default_response_type(),
            session_name: default_session_name(),
            rolling_duration_secs: default_rolling_duration(),
            absolute_duration_secs: default_absolute_duration(),
            cookie_secure: Some(false),
        }
    }
}

fn require_non_empty(key: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidConfig {
            key: key.to_string(),
            reason: "cannot be empty".to_string(),
        });
    }
    Ok(())
}

fn require_http_url(key: &str, value: &str) -> Result<(), AppError> {
    let url = url::Url::parse(value).map_err(|e| AppError::InvalidConfig {
        key: key.to_string(),
        reason: format!("invalid URL: {}", e),
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AppError::InvalidConfig {
            key: key.to_string(),
            reason: "must start with http:// or https://".to_string(),
        });
    }
    Ok(())
}

// Default value functions
fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_true() -> bool {
    true
}

fn default_scope() -> String {
    "openid profile email".to_string()
}

fn default_response_type() -> String {
    "code".to_string()
}

fn default_session_name() -> String {
    "appSession".to_string()
}

fn default_rolling_duration() -> u64 {
    86400 // 1 day
}

fn default_absolute_duration() -> u64 {
    86400 * 7
}
