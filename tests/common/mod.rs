pub mod mock_idp;

use oidc_webapp::auth::{Auth, AuthConfig};
use oidc_webapp::config::Settings;
use oidc_webapp::start_server_with_listener;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;

pub use mock_idp::MockIdp;

/// The user the mock provider signs in by default
pub fn test_user() -> Value {
    json!({
        "sub": "auth0|test-user",
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "nickname": "ada",
        "picture": "https://example.com/ada.png",
    })
}

/// App server wired to its own mock identity provider
pub struct TestServer {
    port: u16,
    idp: MockIdp,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a test server with automatic port selection and shutdown support
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start a test server after letting `configure` adjust the settings
    pub async fn start_with(configure: impl FnOnce(&mut Settings)) -> anyhow::Result<Self> {
        let idp = MockIdp::start(test_user()).await?;

        // Bind first so base_url carries the real port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let mut settings = Settings::test_config_with_port(port, idp.issuer());
        settings.static_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("static");
        configure(&mut settings);

        let auth = Auth::from_config(AuthConfig::from_settings(&settings)?)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        start_server_with_listener(listener, &settings, auth, shutdown_rx).await?;

        Ok(Self {
            port,
            idp,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn idp(&self) -> &MockIdp {
        &self.idp
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            // Give server time to shut down
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Minimal browser: follows nothing on its own, remembers cookies.
///
/// All test servers live on 127.0.0.1, so one cookie store for every
/// origin is close enough to what a real browser does.
pub struct Browser {
    client: reqwest::Client,
    cookies: BTreeMap<String, String>,
}

impl Browser {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            cookies: BTreeMap::new(),
        }
    }

    /// GET `url` with the stored cookies, then store what the response sets
    pub async fn get(&mut self, url: &str) -> reqwest::Response {
        let mut request = self.client.get(url);
        if !self.cookies.is_empty() {
            request = request.header(COOKIE, self.cookie_header());
        }

        let response = request.send().await.expect("request failed");
        for value in response.headers().get_all(SET_COOKIE) {
            if let Ok(value) = value.to_str() {
                self.store(value);
            }
        }
        response
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    /// Walk the whole login flow, starting from `/login?returnTo=...`.
    /// Returns the app's final response from the callback.
    pub async fn login(&mut self, server: &TestServer, return_to: &str) -> reqwest::Response {
        let login_url = format!(
            "{}?returnTo={}",
            server.url("/login"),
            urlencode(return_to)
        );

        let to_idp = self.get(&login_url).await;
        assert_eq!(to_idp.status(), 302, "login should redirect to the IdP");

        let to_callback = self.get(&location(&to_idp)).await;
        assert_eq!(to_callback.status(), 302, "IdP should redirect back");

        self.get(&location(&to_callback)).await
    }

    fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn store(&mut self, set_cookie: &str) {
        let mut parts = set_cookie.split(';').map(str::trim);
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };

        let removed = value.is_empty()
            || parts.any(|attr| attr.eq_ignore_ascii_case("Max-Age=0"));
        if removed {
            self.cookies.remove(name);
        } else {
            self.cookies.insert(name.to_string(), value.to_string());
        }
    }
}

impl Default for Browser {
    fn default() -> Self {
        Self::new()
    }
}

/// Location header of a redirect response
pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("response has no Location header")
        .to_string()
}

/// Set-Cookie headers of a response
pub fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

pub fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
