// Session Cookie Management
// Stateless sessions: the whole session lives in an encrypted cookie

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

use super::config::SessionConfig;
use super::error::AuthError;
use super::provider::UserClaims;

/// Largest cookie value written before splitting into chunks. Browsers cap a
/// whole cookie (name, value and attributes) at 4096 bytes.
const CHUNK_SIZE: usize = 3900;

const NONCE_LEN: usize = 12;

/// Name of the cookie carrying state and nonce between login and callback
pub const VERIFICATION_COOKIE: &str = "auth_verification";

/// Authenticated session stored in the session cookie
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppSession {
    /// Claims from the verified ID token
    pub user: UserClaims,

    /// Compact ID token as issued by the provider
    pub id_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Created at
    pub iat: DateTime<Utc>,

    /// Last touched at
    pub uat: DateTime<Utc>,

    /// Absolute expiry
    pub exp: DateTime<Utc>,
}

impl AppSession {
    pub fn new(
        user: UserClaims,
        id_token: String,
        access_token: Option<String>,
        config: &SessionConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            user,
            id_token,
            access_token,
            iat: now,
            uat: now,
            exp: add_duration(now, config.absolute_duration),
        }
    }

    /// When the session stops being valid if nothing touches it again
    pub fn expires_at(&self, config: &SessionConfig) -> DateTime<Utc> {
        add_duration(self.uat, config.rolling_duration).min(self.exp)
    }

    pub fn is_expired(&self, config: &SessionConfig, now: DateTime<Utc>) -> bool {
        now >= self.expires_at(config)
    }

    /// Extend the rolling window
    pub fn touch(&mut self) {
        self.uat = Utc::now();
    }
}

/// Transient state kept between the login redirect and the callback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthVerification {
    pub state: String,
    pub nonce: String,
    pub return_to: String,
}

fn add_duration(at: DateTime<Utc>, d: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// AES-256-GCM codec for cookie payloads. The key is derived from the
/// configured secret so any string length works.
pub struct CookieCodec {
    cipher: Aes256Gcm,
}

impl CookieCodec {
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"oidc-webapp session cookie v1");
        hasher.update(secret.as_bytes());
        let key: [u8; 32] = hasher.finalize().into();

        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Serialize and encrypt to a cookie-safe string (`base64url(nonce || ciphertext)`)
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<String, AuthError> {
        let plaintext = serde_json::to_vec(value)?;

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| AuthError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypt and deserialize a value produced by [`CookieCodec::seal`]
    pub fn open<T: DeserializeOwned>(&self, sealed: &str) -> Result<T, AuthError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|_| AuthError::InvalidSessionCookie)?;

        if bytes.len() <= NONCE_LEN {
            return Err(AuthError::InvalidSessionCookie);
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AuthError::InvalidSessionCookie)?;

        serde_json::from_slice(&plaintext).map_err(|_| AuthError::InvalidSessionCookie)
    }
}

/// Reads and writes the session and verification cookies
pub struct SessionCookies {
    config: SessionConfig,
    codec: CookieCodec,
}

impl SessionCookies {
    pub fn new(secret: &str, config: SessionConfig) -> Self {
        Self {
            config,
            codec: CookieCodec::new(secret),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Load the session from the jar. Missing, tampered and expired
    /// cookies all mean "no session".
    pub fn read(&self, jar: &CookieJar) -> Option<AppSession> {
        let sealed = self.raw_value(jar)?;

        let session: AppSession = match self.codec.open(&sealed) {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!("Ignoring session cookie: {}", e);
                return None;
            }
        };

        if session.is_expired(&self.config, Utc::now()) {
            tracing::debug!("Session for {} expired", session.user.sub);
            return None;
        }

        Some(session)
    }

    /// Cookies that store `session`, replacing whatever `jar` currently holds
    pub fn write(
        &self,
        jar: &CookieJar,
        session: &AppSession,
    ) -> Result<Vec<Cookie<'static>>, AuthError> {
        let sealed = self.codec.seal(session)?;
        let max_age = (session.expires_at(&self.config) - Utc::now())
            .num_seconds()
            .max(0);

        let mut cookies = Vec::new();
        let written: Vec<String> = if sealed.len() <= CHUNK_SIZE {
            cookies.push(self.build(self.config.name.clone(), sealed, max_age));
            vec![self.config.name.clone()]
        } else {
            sealed
                .as_bytes()
                .chunks(CHUNK_SIZE)
                .enumerate()
                .map(|(i, chunk)| {
                    let name = format!("{}.{}", self.config.name, i);
                    // base64url output is ASCII, so chunk boundaries are char boundaries
                    let value = String::from_utf8_lossy(chunk).into_owned();
                    cookies.push(self.build(name.clone(), value, max_age));
                    name
                })
                .collect()
        };

        // Drop leftovers from a previous, differently chunked session
        for name in self.existing_names(jar) {
            if !written.contains(&name) {
                cookies.push(self.removal(name));
            }
        }

        Ok(cookies)
    }

    /// Cookies that remove every part of the session currently in `jar`
    pub fn clear(&self, jar: &CookieJar) -> Vec<Cookie<'static>> {
        self.existing_names(jar)
            .into_iter()
            .map(|name| self.removal(name))
            .collect()
    }

    pub fn write_verification(
        &self,
        verification: &AuthVerification,
    ) -> Result<Cookie<'static>, AuthError> {
        let sealed = self.codec.seal(verification)?;
        // The IdP round trip should not take longer than this
        Ok(self.build(VERIFICATION_COOKIE.to_string(), sealed, 600))
    }

    pub fn read_verification(&self, jar: &CookieJar) -> Result<AuthVerification, AuthError> {
        let cookie = jar
            .get(VERIFICATION_COOKIE)
            .ok_or(AuthError::MissingVerification)?;
        self.codec
            .open(cookie.value())
            .map_err(|_| AuthError::MissingVerification)
    }

    pub fn clear_verification(&self) -> Cookie<'static> {
        self.removal(VERIFICATION_COOKIE.to_string())
    }

    /// Whole (possibly reassembled) sealed value
    fn raw_value(&self, jar: &CookieJar) -> Option<String> {
        if let Some(cookie) = jar.get(&self.config.name) {
            return Some(cookie.value().to_string());
        }

        let mut value = String::new();
        for i in 0.. {
            match jar.get(&format!("{}.{}", self.config.name, i)) {
                Some(chunk) => value.push_str(chunk.value()),
                None => break,
            }
        }

        (!value.is_empty()).then_some(value)
    }

    fn existing_names(&self, jar: &CookieJar) -> Vec<String> {
        let chunk_prefix = format!("{}.", self.config.name);
        jar.iter()
            .map(|c| c.name().to_string())
            .filter(|name| {
                *name == self.config.name
                    || name
                        .strip_prefix(&chunk_prefix)
                        .is_some_and(|idx| idx.parse::<usize>().is_ok())
            })
            .collect()
    }

    fn build(&self, name: String, value: String, max_age_secs: i64) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.config.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(max_age_secs))
            .build()
    }

    fn removal(&self, name: String) -> Cookie<'static> {
        self.build(name, String::new(), 0)
    }
}
